//! Consumer loop - one per partition
//!
//! Pulls deliveries from a `MessageSource` and runs them through an
//! `IngestPipeline`, one at a time:
//!
//! 1. handle the payload (decode, validate, enrich, buffer)
//! 2. ack the delivery, whatever the outcome
//! 3. flush if the batch is full
//!
//! The loop ends when the source is exhausted, when the shutdown signal
//! fires, or on a transport error. In every case the pipeline is drained
//! before returning, so a buffered batch is never left behind on a clean stop.

use super::engine::{IngestPipeline, IngestStats, PipelineError};
use crate::transport::{MessageSource, TransportError};
use std::time::Instant;
use tokio::sync::watch;

const RATE_LOG_INTERVAL_SECS: u64 = 10;

enum LoopExit {
    Exhausted,
    Shutdown,
    Failed(TransportError),
}

/// Run the consumer loop until the source ends or shutdown is signalled
///
/// `shutdown` flips to `true` on operator interrupt. Transport errors are
/// returned after the pipeline has drained.
pub async fn run_ingestion<S>(
    pipeline: &mut IngestPipeline,
    source: &mut S,
    mut shutdown: watch::Receiver<bool>,
) -> Result<IngestStats, PipelineError>
where
    S: MessageSource + ?Sized,
{
    log::info!("🚀 [{}] Starting breadcrumb ingestion", pipeline.label());

    let mut window_count = 0u64;
    let mut last_log_time = Instant::now();

    let exit = loop {
        if *shutdown.borrow() {
            break LoopExit::Shutdown;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                // A dropped sender means nobody can signal shutdown any more;
                // treat it like the signal itself
                if changed.is_err() || *shutdown.borrow() {
                    break LoopExit::Shutdown;
                }
            }

            received = source.recv() => {
                let delivery = match received {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => break LoopExit::Exhausted,
                    Err(e) => break LoopExit::Failed(e),
                };

                pipeline.handle_payload(&delivery.payload).await?;

                if let Err(e) = source.ack(delivery.id).await {
                    break LoopExit::Failed(e);
                }

                if pipeline.should_flush() {
                    if let Err(e) = pipeline.flush().await {
                        log::error!("❌ [{}] {}", pipeline.label(), e);
                    }
                }

                window_count += 1;

                if last_log_time.elapsed().as_secs() >= RATE_LOG_INTERVAL_SECS {
                    let per_sec = window_count as f64 / last_log_time.elapsed().as_secs_f64();
                    let stats = pipeline.stats();
                    log::info!(
                        "📊 [{}] Ingestion rate: {:.1} msgs/sec | accepted {} rejected {} \
                         | buffered {} | trips {} | queue {}",
                        pipeline.label(),
                        per_sec,
                        stats.accepted,
                        stats.rejected_total(),
                        pipeline.buffered(),
                        pipeline.history().len(),
                        source.pending().map_or_else(|| "n/a".to_string(), |n| n.to_string())
                    );
                    last_log_time = Instant::now();
                    window_count = 0;
                }
            }
        }
    };

    match &exit {
        LoopExit::Exhausted => {
            log::info!("📭 [{}] Source exhausted, stopping ingestion", pipeline.label())
        }
        LoopExit::Shutdown => {
            log::warn!("🛑 [{}] Shutdown requested, stopping ingestion", pipeline.label())
        }
        LoopExit::Failed(e) => log::error!("❌ [{}] Transport failure: {}", pipeline.label(), e),
    }

    if let Err(e) = source.close().await {
        log::warn!("⚠️  [{}] Failed to close source: {}", pipeline.label(), e);
    }

    let stats = pipeline.drain().await?;
    log::info!("📊 [{}] Final stats: {}", pipeline.label(), stats);

    match exit {
        LoopExit::Failed(e) => Err(PipelineError::Transport(e)),
        LoopExit::Exhausted | LoopExit::Shutdown => Ok(stats),
    }
}
