//! Fixed-capacity batch of accepted breadcrumbs
//!
//! Records accumulate until the batch is full (or the pipeline drains), then
//! go to the sink as one all-or-nothing bulk append.
//!
//! Flush outcome handling:
//! - success: buffer cleared, row count logged
//! - failure: retried per `FlushPolicy` (none by default); once attempts are
//!   exhausted the rows go to the dead-letter sink if one is configured, and
//!   the buffer is cleared either way so the stream keeps moving

use super::types::{EnrichedBreadcrumb, SinkRow};
use crate::sink_core::{BreadcrumbSink, ExponentialBackoff, SinkError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub const DEFAULT_BATCH_CAPACITY: usize = 1_000;

/// How a flush treats a failing sink
#[derive(Clone)]
pub struct FlushPolicy {
    /// Upper bound on a single bulk append
    pub sink_timeout: Duration,
    /// Attempts after the first failure; 0 means fail straight away
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub dead_letter: Option<Arc<dyn BreadcrumbSink>>,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            sink_timeout: Duration::from_secs(30),
            max_retries: 0,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
            dead_letter: None,
        }
    }
}

impl std::fmt::Debug for FlushPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushPolicy")
            .field("sink_timeout", &self.sink_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_base", &self.retry_base)
            .field("retry_max", &self.retry_max)
            .field("dead_letter", &self.dead_letter.as_ref().map(|s| s.backend_type()))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub rows: usize,
    pub attempts: u32,
}

/// A batch that could not be appended
#[derive(Debug)]
pub struct FlushError {
    pub rows: usize,
    pub attempts: u32,
    pub dead_lettered: bool,
    pub source: SinkError,
}

impl std::fmt::Display for FlushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Flush of {} rows failed after {} attempt(s) ({}): {}",
            self.rows,
            self.attempts,
            if self.dead_lettered { "dead-lettered" } else { "discarded" },
            self.source
        )
    }
}

impl std::error::Error for FlushError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Debug)]
pub struct BatchBuffer {
    records: Vec<EnrichedBreadcrumb>,
    capacity: usize,
}

impl BatchBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a record; hands it back when the batch is already full
    pub fn append(&mut self, record: EnrichedBreadcrumb) -> Result<(), EnrichedBreadcrumb> {
        if self.is_full() {
            return Err(record);
        }
        self.records.push(record);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows in sink column order, without clearing the buffer
    pub fn rows(&self) -> Vec<SinkRow> {
        self.records.iter().map(SinkRow::from).collect()
    }

    /// Bulk-append the buffered records to `sink`
    ///
    /// An empty buffer is a no-op. The buffer is empty when this returns.
    pub async fn flush(
        &mut self,
        sink: &dyn BreadcrumbSink,
        policy: &FlushPolicy,
    ) -> Result<FlushReport, FlushError> {
        if self.records.is_empty() {
            return Ok(FlushReport { rows: 0, attempts: 0 });
        }

        let rows = self.rows();
        let mut backoff =
            ExponentialBackoff::new(policy.retry_base, policy.retry_max, policy.max_retries);
        let mut attempts = 0u32;

        let last_error = loop {
            attempts += 1;

            let error = match timeout(policy.sink_timeout, sink.append_rows(&rows)).await {
                Ok(Ok(written)) => {
                    self.records.clear();
                    log::info!("✅ Flushed {} rows to {}", written, sink.backend_type());
                    return Ok(FlushReport {
                        rows: written,
                        attempts,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => SinkError::Timeout(policy.sink_timeout),
            };

            log::error!(
                "❌ Bulk append of {} rows to {} failed (attempt {}): {}",
                rows.len(),
                sink.backend_type(),
                attempts,
                error
            );

            if backoff.sleep().await.is_err() {
                break error;
            }
        };

        let dead_lettered = match &policy.dead_letter {
            Some(dead_letter) => match dead_letter.append_rows(&rows).await {
                Ok(n) => {
                    log::warn!("📮 Dead-lettered {} rows to {}", n, dead_letter.backend_type());
                    true
                }
                Err(e) => {
                    log::error!("❌ Dead-letter write failed, {} rows lost: {}", rows.len(), e);
                    false
                }
            },
            None => {
                log::error!("❌ Discarding batch of {} rows", rows.len());
                false
            }
        };

        self.records.clear();

        Err(FlushError {
            rows: rows.len(),
            attempts,
            dead_lettered,
            source: last_error,
        })
    }
}
