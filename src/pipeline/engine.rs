//! Ingest pipeline - per-partition orchestration
//!
//! `IngestPipeline` owns the trip history and the batch buffer for one
//! sequential consumer. Each payload goes through:
//!
//! ```text
//! payload
//!     ↓
//! decode_breadcrumb()
//!     ↓
//! RecordValidator::validate()   (against TripHistory)
//!     ↓
//! SpeedEnricher::enrich() → TripHistory::update()
//!     ↓
//! BatchBuffer::append()
//!     ↓
//! BatchBuffer::flush() → BreadcrumbSink   (when full, and on drain)
//! ```
//!
//! ## Lifecycle
//!
//! `Running` → `Draining` (shutdown) → `Stopped`. Payloads are accepted only
//! while running. Draining performs one final flush of the partial batch and
//! closes the sink, unless the sink is shared with other partitions.
//! `Stopped` is terminal.

use super::buffer::{BatchBuffer, FlushError, FlushPolicy, FlushReport};
use super::config::PipelineConfig;
use super::enricher::SpeedEnricher;
use super::history::TripHistory;
use super::types::{decode_breadcrumb, TripState};
use super::validator::{RecordValidator, Rejection, Rule, ValidationConfig, Verdict};
use crate::sink_core::BreadcrumbSink;
use crate::transport::TransportError;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Running => write!(f, "RUNNING"),
            PipelineState::Draining => write!(f, "DRAINING"),
            PipelineState::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    /// Operation refused in the current lifecycle state
    NotRunning(PipelineState),
    /// Transport failure; fatal to the run
    Transport(TransportError),
}

impl From<TransportError> for PipelineError {
    fn from(err: TransportError) -> Self {
        PipelineError::Transport(err)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::NotRunning(state) => write!(f, "Pipeline is {}", state),
            PipelineError::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Transport(e) => Some(e),
            PipelineError::NotRunning(_) => None,
        }
    }
}

/// What happened to one payload
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Accepted { trip_id: i64, speed: f64 },
    Rejected(Rejection),
    DecodeFailed,
}

/// Running counters for one pipeline (or the sum over partitions)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestStats {
    pub received: u64,
    pub accepted: u64,
    pub decode_errors: u64,
    pub rejected: BTreeMap<Rule, u64>,
    pub rows_flushed: u64,
    pub batches_flushed: u64,
    pub batches_failed: u64,
    pub rows_dead_lettered: u64,
    /// Rows of failed batches that reached neither the sink nor a dead letter
    pub rows_lost: u64,
    pub trips_evicted: u64,
}

impl IngestStats {
    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }

    pub fn rejected_by(&self, rule: Rule) -> u64 {
        self.rejected.get(&rule).copied().unwrap_or(0)
    }

    /// Add another partition's counters into this one
    pub fn merge(&mut self, other: &IngestStats) {
        self.received += other.received;
        self.accepted += other.accepted;
        self.decode_errors += other.decode_errors;
        for (rule, count) in &other.rejected {
            *self.rejected.entry(*rule).or_insert(0) += count;
        }
        self.rows_flushed += other.rows_flushed;
        self.batches_flushed += other.batches_flushed;
        self.batches_failed += other.batches_failed;
        self.rows_dead_lettered += other.rows_dead_lettered;
        self.rows_lost += other.rows_lost;
        self.trips_evicted += other.trips_evicted;
    }
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} accepted={} rejected={} decode_errors={} \
             flushed={} rows/{} batches failed_batches={} dead_lettered={} lost={}",
            self.received,
            self.accepted,
            self.rejected_total(),
            self.decode_errors,
            self.rows_flushed,
            self.batches_flushed,
            self.batches_failed,
            self.rows_dead_lettered,
            self.rows_lost
        )?;
        for (rule, count) in &self.rejected {
            write!(f, " {}={}", rule, count)?;
        }
        Ok(())
    }
}

pub struct IngestPipeline {
    validator: RecordValidator,
    enricher: SpeedEnricher,
    history: TripHistory,
    buffer: BatchBuffer,
    sink: Arc<dyn BreadcrumbSink>,
    policy: FlushPolicy,
    state: PipelineState,
    stats: IngestStats,
    /// Log prefix, e.g. `p3` for partition 3
    label: String,
    /// Cleared when partitions share one sink; the runtime closes it instead
    close_sink_on_drain: bool,
}

impl IngestPipeline {
    pub fn new(
        config: &PipelineConfig,
        sink: Arc<dyn BreadcrumbSink>,
        policy: FlushPolicy,
    ) -> Self {
        Self::with_parts(
            config.validation_config(),
            TripHistory::new(config.history_max_trips),
            config.batch_capacity,
            sink,
            policy,
        )
    }

    pub fn with_parts(
        validation: ValidationConfig,
        history: TripHistory,
        batch_capacity: usize,
        sink: Arc<dyn BreadcrumbSink>,
        policy: FlushPolicy,
    ) -> Self {
        Self {
            validator: RecordValidator::new(validation),
            enricher: SpeedEnricher::new(),
            history,
            buffer: BatchBuffer::new(batch_capacity),
            sink,
            policy,
            state: PipelineState::Running,
            stats: IngestStats::default(),
            label: "p0".to_string(),
            close_sink_on_drain: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Leave closing the sink (and dead letter) to whoever shares it
    pub fn with_shared_sink(mut self) -> Self {
        self.close_sink_on_drain = false;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Decode, validate, enrich and buffer one payload
    ///
    /// Per-record failures are outcomes, not errors: the only error is calling
    /// this outside the `Running` state.
    pub async fn handle_payload(&mut self, payload: &[u8]) -> Result<RecordOutcome, PipelineError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning(self.state));
        }
        self.stats.received += 1;

        let raw = match decode_breadcrumb(payload) {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.decode_errors += 1;
                log::warn!("⚠️  [{}] Dropping undecodable message: {}", self.label, e);
                return Ok(RecordOutcome::DecodeFailed);
            }
        };

        let prior = raw.trip_id.and_then(|trip_id| self.history.get(trip_id));

        match self.validator.validate(&raw, prior) {
            Verdict::Accepted(accepted) => {
                let record = self.enricher.enrich(&raw, &accepted);
                self.history.update(accepted.trip_id, TripState::from(&record));

                // The loop flushes a full buffer after every ack; this only
                // triggers when a caller skipped that step
                if self.buffer.is_full() {
                    let _ = self.flush().await;
                }
                if self.buffer.append(record).is_err() {
                    self.stats.rows_lost += 1;
                    log::error!(
                        "❌ [{}] Buffer full after flush, record for trip {} lost",
                        self.label,
                        accepted.trip_id
                    );
                }

                self.stats.accepted += 1;
                Ok(RecordOutcome::Accepted {
                    trip_id: accepted.trip_id,
                    speed: accepted.speed,
                })
            }
            Verdict::Rejected(rejection) => {
                *self.stats.rejected.entry(rejection.rule).or_insert(0) += 1;
                log::warn!(
                    "⚠️  [{}] Rejected [{}] trip={} vehicle={}: {}",
                    self.label,
                    rejection.rule,
                    id_or_unknown(raw.trip_id),
                    id_or_unknown(raw.vehicle_id),
                    rejection.reason
                );
                Ok(RecordOutcome::Rejected(rejection))
            }
        }
    }

    pub fn should_flush(&self) -> bool {
        self.buffer.is_full()
    }

    /// Flush the buffered batch to the sink
    ///
    /// Failures are counted and returned for logging; the buffer is empty
    /// afterwards either way.
    pub async fn flush(&mut self) -> Result<FlushReport, FlushError> {
        let result = self.buffer.flush(self.sink.as_ref(), &self.policy).await;

        match &result {
            Ok(report) if report.rows > 0 => {
                self.stats.rows_flushed += report.rows as u64;
                self.stats.batches_flushed += 1;
            }
            Ok(_) => {}
            Err(e) => {
                self.stats.batches_failed += 1;
                if e.dead_lettered {
                    self.stats.rows_dead_lettered += e.rows as u64;
                } else {
                    self.stats.rows_lost += e.rows as u64;
                }
            }
        }

        result
    }

    /// Stop accepting payloads, flush the partial batch and release the sink
    pub async fn drain(&mut self) -> Result<IngestStats, PipelineError> {
        if self.state == PipelineState::Stopped {
            return Err(PipelineError::NotRunning(self.state));
        }

        self.state = PipelineState::Draining;
        log::info!(
            "🔄 [{}] Draining: final flush of {} buffered rows",
            self.label,
            self.buffer.len()
        );

        if let Err(e) = self.flush().await {
            log::error!("❌ [{}] Final flush failed: {}", self.label, e);
        }

        if self.close_sink_on_drain {
            if let Some(dead_letter) = &self.policy.dead_letter {
                if let Err(e) = dead_letter.close().await {
                    log::error!(
                        "❌ [{}] Failed to close dead-letter {}: {}",
                        self.label,
                        dead_letter.backend_type(),
                        e
                    );
                }
            }
            if let Err(e) = self.sink.close().await {
                log::error!(
                    "❌ [{}] Failed to close {} sink: {}",
                    self.label,
                    self.sink.backend_type(),
                    e
                );
            }
        }

        self.state = PipelineState::Stopped;
        log::info!("✅ [{}] Pipeline stopped", self.label);
        Ok(self.stats())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> IngestStats {
        let mut stats = self.stats.clone();
        stats.trips_evicted = self.history.evicted();
        stats
    }

    pub fn history(&self) -> &TripHistory {
        &self.history
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn id_or_unknown(id: Option<i64>) -> String {
    id.map_or_else(|| "?".to_string(), |id| id.to_string())
}
