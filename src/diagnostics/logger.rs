//! Append-only diagnostics log
//!
//! Entries are written as line-delimited JSON (JSONL) and flushed
//! immediately, so external monitoring can tail the file. Each line goes out
//! in a single write under the sink lock, so concurrent writers never
//! interleave.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{SnapkeepError, SnapkeepResult};

use super::entry::{DiagnosticEntry, DiagnosticEvent};

enum Sink {
    File {
        path: PathBuf,
        write_lock: tokio::sync::Mutex<()>,
    },
    Memory(Mutex<Vec<DiagnosticEntry>>),
}

/// Handles writing diagnostics entries
pub struct DiagnosticsLog {
    sink: Sink,
}

impl DiagnosticsLog {
    /// Create a DiagnosticsLog that appends to the file at `log_path`
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            sink: Sink::File {
                path: log_path,
                write_lock: tokio::sync::Mutex::new(()),
            },
        }
    }

    /// Create a DiagnosticsLog that keeps entries in memory
    pub fn in_memory() -> Self {
        Self {
            sink: Sink::Memory(Mutex::new(Vec::new())),
        }
    }

    /// Append an entry
    pub async fn log(&self, entry: &DiagnosticEntry) -> SnapkeepResult<()> {
        match &self.sink {
            Sink::File { path, write_lock } => {
                let mut line = serde_json::to_string(entry).map_err(|e| {
                    SnapkeepError::Json(format!("Failed to serialize diagnostics entry: {}", e))
                })?;
                line.push('\n');

                let _guard = write_lock.lock().await;
                append_line(path, line.as_bytes()).await
            }
            Sink::Memory(entries) => {
                entries
                    .lock()
                    .map_err(|e| SnapkeepError::Io(format!("Failed to acquire log lock: {}", e)))?
                    .push(entry.clone());
                Ok(())
            }
        }
    }

    /// Append an entry, downgrading a write failure to a warning
    ///
    /// Diagnostics never decide the outcome of the operation they describe.
    pub async fn record(&self, entry: DiagnosticEntry) {
        if let Err(e) = self.log(&entry).await {
            warn!(event = %entry.event, error = %e, "Failed to write diagnostics entry");
        }
    }

    /// Read all entries, oldest first
    ///
    /// Lines that do not parse are skipped with a warning.
    pub async fn read_all(&self) -> SnapkeepResult<Vec<DiagnosticEntry>> {
        match &self.sink {
            Sink::File { path, .. } => read_file(path).await,
            Sink::Memory(entries) => Ok(entries
                .lock()
                .map_err(|e| SnapkeepError::Io(format!("Failed to acquire log lock: {}", e)))?
                .clone()),
        }
    }

    /// Read the most recent N entries from the log
    pub async fn read_recent(&self, count: usize) -> SnapkeepResult<Vec<DiagnosticEntry>> {
        let all_entries = self.read_all().await?;
        let start = all_entries.len().saturating_sub(count);
        Ok(all_entries[start..].to_vec())
    }

    /// Get the number of entries in the log
    pub async fn entry_count(&self) -> SnapkeepResult<usize> {
        Ok(self.read_all().await?.len())
    }

    /// Entries of one event kind, oldest first
    pub async fn events_of(&self, event: DiagnosticEvent) -> SnapkeepResult<Vec<DiagnosticEntry>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.event == event)
            .collect())
    }
}

async fn append_line(path: &Path, line: &[u8]) -> SnapkeepResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SnapkeepError::Io(format!("Failed to create log directory: {}", e)))?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| SnapkeepError::Io(format!("Failed to open diagnostics log: {}", e)))?;

    file.write_all(line)
        .await
        .map_err(|e| SnapkeepError::Io(format!("Failed to write diagnostics entry: {}", e)))?;

    file.flush()
        .await
        .map_err(|e| SnapkeepError::Io(format!("Failed to flush diagnostics log: {}", e)))
}

async fn read_file(path: &Path) -> SnapkeepResult<Vec<DiagnosticEntry>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(SnapkeepError::Io(format!(
                "Failed to read diagnostics log: {}",
                e
            )))
        }
    };

    let mut entries = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<DiagnosticEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(
                line = line_num + 1,
                error = %e,
                "Skipping malformed diagnostics entry"
            ),
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackupId;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_logger() -> (DiagnosticsLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let logger = DiagnosticsLog::new(temp_dir.path().join("diagnostics.log"));
        (logger, temp_dir)
    }

    fn id(n: usize) -> BackupId {
        BackupId::parse(&format!("bk-{}", n)).unwrap()
    }

    #[tokio::test]
    async fn test_log_and_read() {
        let (logger, _temp) = create_test_logger();
        logger
            .log(&DiagnosticEntry::new(DiagnosticEvent::BackupRestored).with_backup(&id(1)))
            .await
            .unwrap();

        let entries = logger.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, DiagnosticEvent::BackupRestored);
        assert_eq!(entries[0].backup_id.as_deref(), Some("bk-1"));
    }

    #[tokio::test]
    async fn test_read_recent() {
        let (logger, _temp) = create_test_logger();
        for i in 0..10 {
            logger
                .record(DiagnosticEntry::backup_evicted(&id(i), "daily"))
                .await;
        }

        let recent = logger.read_recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].backup_id.as_deref(), Some("bk-7"));
        assert_eq!(recent[2].backup_id.as_deref(), Some("bk-9"));
    }

    #[tokio::test]
    async fn test_empty_log() {
        let (logger, _temp) = create_test_logger();
        assert_eq!(logger.entry_count().await.unwrap(), 0);
        assert!(logger.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let (logger, temp) = create_test_logger();
        logger
            .record(DiagnosticEntry::new(DiagnosticEvent::KeyCreated))
            .await;

        let logger2 = DiagnosticsLog::new(temp.path().join("diagnostics.log"));
        assert_eq!(logger2.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_sink() {
        let logger = DiagnosticsLog::in_memory();
        logger
            .record(DiagnosticEntry::new(DiagnosticEvent::KeyCreated))
            .await;
        logger
            .record(DiagnosticEntry::backup_evicted(&id(1), "weekly"))
            .await;

        assert_eq!(logger.entry_count().await.unwrap(), 2);
        assert_eq!(
            logger
                .events_of(DiagnosticEvent::BackupEvicted)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_keep_lines_whole() {
        let (logger, _temp) = create_test_logger();
        let logger = Arc::new(logger);

        let mut handles = Vec::new();
        for writer in 0..8 {
            let logger = Arc::clone(&logger);
            handles.push(tokio::spawn(async move {
                for n in 0..250 {
                    logger
                        .record(
                            DiagnosticEntry::backup_evicted(&id(writer * 1000 + n), "daily")
                                .with_details(serde_json::json!({ "pad": "x".repeat(512) })),
                        )
                        .await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(logger.entry_count().await.unwrap(), 2000);
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let (logger, temp) = create_test_logger();
        logger
            .record(DiagnosticEntry::new(DiagnosticEvent::KeyCreated))
            .await;

        let path = temp.path().join("diagnostics.log");
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{\"timestamp\": \"garbage\"\n");
        std::fs::write(&path, contents).unwrap();

        logger
            .record(DiagnosticEntry::backup_evicted(&id(2), "yearly"))
            .await;

        let entries = logger.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].event, DiagnosticEvent::BackupEvicted);
    }
}
