use crate::pipeline::types::SinkRow;
use crate::sink_core::writer_backend::{BreadcrumbSink, SinkError};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = include_str!("../../sql/01_breadcrumb.sql");

const INSERT_ROW: &str = "INSERT INTO breadcrumb (tstamp, latitude, longitude, speed, trip_id)
     VALUES (?1, ?2, ?3, ?4, ?5)";

/// Relational sink: appends each batch to the `breadcrumb` table in one transaction
pub struct SqliteSink {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteSink {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let db_path = db_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SinkError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create database directory {}: {}", parent.display(), e),
                ))
            })?;
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;

        log::info!("✅ SQLite sink initialized at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    fn insert_all(conn: &mut Connection, rows: &[SinkRow]) -> Result<usize, SinkError> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_ROW)?;
            for row in rows {
                stmt.execute(params![
                    row.tstamp,
                    row.latitude,
                    row.longitude,
                    row.speed,
                    row.trip_id
                ])?;
            }
        }
        // dropping `tx` without commit rolls the whole batch back
        tx.commit()?;
        Ok(rows.len())
    }
}

#[async_trait]
impl BreadcrumbSink for SqliteSink {
    async fn append_rows(&self, rows: &[SinkRow]) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.clone();
        let rows = rows.to_vec();

        // rusqlite blocks; keep it off the runtime so the caller's timeout can fire
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| SinkError::Database("connection lock poisoned".to_string()))?;
            let conn = guard.as_mut().ok_or(SinkError::Closed)?;
            Self::insert_all(conn, &rows)
        })
        .await
        .map_err(|e| SinkError::Database(format!("writer task failed: {}", e)))?
    }

    async fn close(&self) -> Result<(), SinkError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| SinkError::Database("connection lock poisoned".to_string()))?;

        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| SinkError::from(e))?;
            log::info!("🔒 SQLite sink closed");
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
