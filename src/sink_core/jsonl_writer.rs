use crate::pipeline::types::SinkRow;
use crate::sink_core::writer_backend::{BreadcrumbSink, SinkError};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Newline-delimited JSON sink with size-based rotation
///
/// Serves as the alternative `jsonl` backend and as the dead-letter store for
/// batches the primary sink could not take. A `max_rotations` of 0 disables
/// rotation.
pub struct JsonlSink {
    inner: Mutex<JsonlFile>,
}

struct JsonlFile {
    file: Option<BufWriter<File>>,
    current_size: u64,
    max_size: u64,
    base_path: PathBuf,
    rotation_count: u32,
    max_rotations: u32,
}

impl JsonlSink {
    pub fn open(
        path: impl AsRef<Path>,
        max_size_mb: u64,
        max_rotations: u32,
    ) -> Result<Self, SinkError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            inner: Mutex::new(JsonlFile {
                file: Some(BufWriter::new(file)),
                current_size,
                max_size: max_size_mb.saturating_mul(1024 * 1024),
                base_path: path.to_path_buf(),
                rotation_count: 0,
                max_rotations,
            }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, JsonlFile>, SinkError> {
        self.inner.lock().map_err(|_| {
            SinkError::Io(std::io::Error::new(std::io::ErrorKind::Other, "jsonl lock poisoned"))
        })
    }
}

impl JsonlFile {
    fn write_rows(&mut self, rows: &[SinkRow]) -> Result<usize, SinkError> {
        // Serialize the whole batch first so a bad row never leaves a partial batch
        let mut chunk = String::new();
        for row in rows {
            chunk.push_str(&serde_json::to_string(row)?);
            chunk.push('\n');
        }

        let file = self.file.as_mut().ok_or(SinkError::Closed)?;
        file.write_all(chunk.as_bytes())?;
        file.flush()?;

        self.current_size += chunk.len() as u64;
        if self.max_rotations > 0 && self.max_size > 0 && self.current_size >= self.max_size {
            // The rows are already on disk: failing here would make callers write them again
            if let Err(e) = self.rotate() {
                log::error!("❌ Failed to rotate {}: {}", self.base_path.display(), e);
            }
        }

        Ok(rows.len())
    }

    fn rotate(&mut self) -> Result<(), SinkError> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        self.file = None;

        let shifted = self.shift_rotated_files();

        // Reopen even when shifting failed, so later batches still have a file
        let file = OpenOptions::new().create(true).append(true).open(&self.base_path)?;
        self.current_size = file.metadata()?.len();
        self.file = Some(BufWriter::new(file));
        shifted?;

        self.rotation_count += 1;
        log::info!("📄 Rotated {} (rotation #{})", self.base_path.display(), self.rotation_count);

        Ok(())
    }

    fn shift_rotated_files(&self) -> Result<(), SinkError> {
        for i in (1..self.max_rotations).rev() {
            let old_path = self.base_path.with_extension(format!("jsonl.{}", i));
            let new_path = self.base_path.with_extension(format!("jsonl.{}", i + 1));

            if old_path.exists() {
                std::fs::rename(&old_path, &new_path)?;
            }
        }

        if self.base_path.exists() {
            std::fs::rename(&self.base_path, self.base_path.with_extension("jsonl.1"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl BreadcrumbSink for JsonlSink {
    async fn append_rows(&self, rows: &[SinkRow]) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.lock()?.write_rows(rows)
    }

    async fn close(&self) -> Result<(), SinkError> {
        let mut inner = self.lock()?;
        if let Some(mut file) = inner.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn create_test_row(trip_id: i64) -> SinkRow {
        let date = NaiveDate::from_ymd_opt(2023, 2, 15).unwrap();
        SinkRow {
            tstamp: date.and_hms_opt(6, 0, 0).unwrap(),
            latitude: 45.5,
            longitude: -122.6,
            speed: 4.25,
            trip_id,
        }
    }

    #[tokio::test]
    async fn test_rows_written_as_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        let sink = JsonlSink::open(&path, 100, 3).unwrap();

        let rows = vec![create_test_row(1), create_test_row(2)];
        assert_eq!(sink.append_rows(&rows).await.unwrap(), 2);
        sink.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let decoded: Vec<SinkRow> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(decoded, rows);
    }

    #[tokio::test]
    async fn test_rotation_when_size_exceeded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        let sink = JsonlSink::open(&path, 0, 3).unwrap();
        // force a tiny limit
        sink.inner.lock().unwrap().max_size = 10;

        sink.append_rows(&[create_test_row(1)]).await.unwrap();

        assert!(path.with_extension("jsonl.1").exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_zero_rotations_keeps_written_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        let sink = JsonlSink::open(&path, 0, 0).unwrap();
        sink.inner.lock().unwrap().max_size = 10;

        assert_eq!(sink.append_rows(&[create_test_row(1)]).await.unwrap(), 1);
        assert_eq!(sink.append_rows(&[create_test_row(2)]).await.unwrap(), 1);
        sink.close().await.unwrap();

        assert!(!path.with_extension("jsonl.1").exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_batch_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        // A directory in the way makes renaming the base file fail
        let blocker = path.with_extension("jsonl.1");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let sink = JsonlSink::open(&path, 0, 1).unwrap();
        sink.inner.lock().unwrap().max_size = 10;

        assert_eq!(sink.append_rows(&[create_test_row(1)]).await.unwrap(), 1);
        assert_eq!(sink.append_rows(&[create_test_row(2)]).await.unwrap(), 1);
        sink.close().await.unwrap();

        let decoded: Vec<SinkRow> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(decoded, vec![create_test_row(1), create_test_row(2)]);
    }

    #[tokio::test]
    async fn test_append_after_close_fails() {
        let dir = tempdir().unwrap();
        let sink = JsonlSink::open(dir.path().join("rows.jsonl"), 100, 3).unwrap();
        sink.close().await.unwrap();

        let result = sink.append_rows(&[create_test_row(1)]).await;
        assert!(matches!(result, Err(SinkError::Closed)));
    }
}
