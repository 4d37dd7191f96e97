//! Vehicle breadcrumb ingest pipeline
//!
//! Validates a stream of GPS/odometer breadcrumbs against ten correctness
//! rules, derives per-trip speed and bulk-loads accepted records into a
//! relational sink in fixed-size batches.
//!
//! ## Module Organization
//!
//! - `pipeline` - validation, trip history, enrichment, batching, consumer loop
//! - `sink_core` - bulk-append sinks (SQLite, JSONL) and retry backoff
//! - `transport` - message source abstraction and the JSONL replay feed
//! - `sqlite_pragma` - connection tuning shared by SQLite users

pub mod pipeline;
pub mod sink_core;
pub mod sqlite_pragma;
pub mod transport;
