pub mod error_handler;
pub mod jsonl_writer;
pub mod sqlite_writer;
pub mod writer_backend;

pub use error_handler::ExponentialBackoff;
pub use jsonl_writer::JsonlSink;
pub use sqlite_writer::SqliteSink;
pub use writer_backend::{BreadcrumbSink, SinkError};
