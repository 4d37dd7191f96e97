//! # Breadcrumb pipeline
//!
//! One sequential consumer per partition:
//!
//! ```text
//! transport → decode → validate → enrich → buffer → ack → flush (when full)
//! ```
//!
//! Partitions are sharded by trip id (`router`), so the per-trip rules always
//! see a trip's records in delivery order.
//!
//! ## Module Organization
//!
//! - `types` - wire decoding, raw/enriched records, sink rows
//! - `validator` - the ten ordered rules
//! - `history` - bounded per-trip last-seen state
//! - `enricher` - attaches derived speed and sample timestamp
//! - `buffer` - fixed-capacity batch and flush policy
//! - `engine` - `IngestPipeline` state machine and counters
//! - `ingestion` - the consumer loop
//! - `router` - trip-id sharding across partitions
//! - `config` - environment and CLI configuration

pub mod buffer;
pub mod config;
pub mod engine;
pub mod enricher;
pub mod history;
pub mod ingestion;
pub mod router;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use buffer::{BatchBuffer, FlushError, FlushPolicy, FlushReport};
pub use config::{BackendType, ConfigError, PipelineConfig};
pub use engine::{IngestPipeline, IngestStats, PipelineError, PipelineState, RecordOutcome};
pub use enricher::SpeedEnricher;
pub use history::TripHistory;
pub use ingestion::run_ingestion;
pub use router::TripRouter;
pub use types::{
    decode_breadcrumb, DecodeError, EnrichedBreadcrumb, RawBreadcrumb, SinkRow, TripState,
};
pub use validator::{RecordValidator, Rejection, Rule, ValidationConfig, Verdict};
