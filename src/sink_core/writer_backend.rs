use crate::pipeline::types::SinkRow;
use async_trait::async_trait;

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
    Timeout(std::time::Duration),
    Closed,
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        SinkError::Database(err.to_string())
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SinkError::Database(e) => write!(f, "Database error: {}", e),
            SinkError::Timeout(d) => write!(f, "Sink call timed out after {}ms", d.as_millis()),
            SinkError::Closed => write!(f, "Sink is closed"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Bulk-append target for accepted breadcrumbs
#[async_trait]
pub trait BreadcrumbSink: Send + Sync {
    /// Append all rows in one all-or-nothing call
    ///
    /// Returns the number of rows written. On error nothing from `rows` is persisted.
    async fn append_rows(&self, rows: &[SinkRow]) -> Result<usize, SinkError>;

    /// Release the underlying connection or file handle
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
