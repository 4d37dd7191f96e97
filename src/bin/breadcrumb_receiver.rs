//! Breadcrumb Receiver - production runtime
//!
//! Wires the replay feed to the partitioned ingest pipelines:
//! - Opens the sink (SQLite or JSONL) and optional dead-letter store
//! - Spawns one consumer loop per partition, sharded by trip id
//! - Feeds breadcrumbs from a JSONL file or stdin
//! - Drains every partition on CTRL+C or when the feed is exhausted
//!
//! Usage:
//!   cargo run --release --bin breadcrumb_receiver -- --source crumbs.jsonl --db breadcrumbs.db
//!
//! Environment variables: see `PipelineConfig::from_env`. Flags override them.

use crumbflow::pipeline::{
    run_ingestion, BackendType, IngestPipeline, IngestStats, PipelineConfig, TripRouter,
};
use crumbflow::sink_core::{BreadcrumbSink, JsonlSink, SqliteSink};
use crumbflow::transport::{spawn_jsonl_feed, ChannelSource};
use dotenv::dotenv;
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// JSONL sink and dead-letter files rotate at this size
const JSONL_MAX_SIZE_MB: u64 = 256;
const JSONL_MAX_ROTATIONS: u32 = 10;

fn open_sink(
    config: &PipelineConfig,
) -> Result<Arc<dyn BreadcrumbSink>, Box<dyn std::error::Error>> {
    let sink: Arc<dyn BreadcrumbSink> = match config.backend {
        BackendType::Sqlite => Arc::new(SqliteSink::open(&config.db_path)?),
        BackendType::Jsonl => Arc::new(JsonlSink::open(
            &config.db_path,
            JSONL_MAX_SIZE_MB,
            JSONL_MAX_ROTATIONS,
        )?),
    };
    Ok(sink)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = PipelineConfig::from_env()?;
    let args: Vec<String> = env::args().skip(1).collect();
    config.apply_args(&args)?;

    info!("🚀 Breadcrumb Receiver");
    let source_name = if config.source == "-" { "stdin" } else { config.source.as_str() };
    info!("   ├─ Source: {}", source_name);
    info!("   ├─ Sink: {:?} at {}", config.backend, config.db_path);
    info!("   ├─ Batch capacity: {}", config.batch_capacity);
    info!("   ├─ Max speed: {} m/s", config.max_speed_mps);
    info!("   ├─ Flush retries: {}", config.flush_max_retries);
    info!("   ├─ Dead letter: {}", config.dead_letter_path.as_deref().unwrap_or("disabled"));
    info!("   └─ Partitions: {}", config.partitions);

    let sink = open_sink(&config)?;
    let dead_letter: Option<Arc<dyn BreadcrumbSink>> = match &config.dead_letter_path {
        Some(path) => Some(Arc::new(JsonlSink::open(
            path,
            JSONL_MAX_SIZE_MB,
            JSONL_MAX_ROTATIONS,
        )?)),
        None => None,
    };
    let policy = config.flush_policy(dead_letter.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut partitions = JoinSet::new();
    let mut senders = Vec::with_capacity(config.partitions);

    for index in 0..config.partitions {
        let (tx, mut source) = ChannelSource::channel(config.channel_buffer);
        senders.push(tx);

        let mut pipeline = IngestPipeline::new(&config, sink.clone(), policy.clone())
            .with_label(format!("p{}", index))
            .with_shared_sink();
        let shutdown = shutdown_rx.clone();

        partitions.spawn(async move { run_ingestion(&mut pipeline, &mut source, shutdown).await });
    }
    drop(shutdown_rx);
    info!("✅ {} partition(s) running", config.partitions);

    let feed = spawn_jsonl_feed(config.source.clone(), TripRouter::new(senders));

    info!("🔄 Press CTRL+C to shutdown gracefully");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut failed = false;
    let mut total = IngestStats::default();

    loop {
        tokio::select! {
            result = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                match result {
                    Ok(()) => warn!("⚠️  Received CTRL+C, draining partitions..."),
                    Err(e) => error!("❌ Failed to listen for CTRL+C: {}", e),
                }
                let _ = shutdown_tx.send(true);
            }

            joined = partitions.join_next() => match joined {
                Some(Ok(Ok(stats))) => total.merge(&stats),
                Some(Ok(Err(e))) => {
                    error!("❌ Partition failed: {}", e);
                    failed = true;
                    let _ = shutdown_tx.send(true);
                }
                Some(Err(e)) => {
                    error!("❌ Partition task panicked: {}", e);
                    failed = true;
                    let _ = shutdown_tx.send(true);
                }
                None => break,
            }
        }
    }

    // The feed may still be parked on stdin
    if feed.is_finished() {
        match feed.await {
            Ok(Ok(count)) => info!("📥 Feed delivered {} messages", count),
            Ok(Err(e)) => {
                error!("❌ Feed failed: {}", e);
                failed = true;
            }
            Err(e) => {
                error!("❌ Feed task panicked: {}", e);
                failed = true;
            }
        }
    } else {
        feed.abort();
    }

    if let Err(e) = sink.close().await {
        error!("❌ Failed to close {} sink: {}", sink.backend_type(), e);
    }
    if let Some(dead_letter) = &dead_letter {
        if let Err(e) = dead_letter.close().await {
            error!("❌ Failed to close dead-letter store: {}", e);
        }
    }

    info!("📊 Final stats: {}", total);

    if failed {
        return Err("breadcrumb receiver stopped after a transport failure".into());
    }

    info!("✅ Breadcrumb receiver stopped");
    Ok(())
}
