//! Durable key/value persistence
//!
//! Everything the engine persists goes through a [`KvBackend`]: the record
//! table, the metadata index and the encryption key. Each operation is atomic
//! on its own; there are no multi-key transactions.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{SnapkeepError, SnapkeepResult};
use crate::models::ids::is_valid_key;

use super::file_io::{read_bytes_optional, write_bytes_atomic};

/// Full backup records, payload included
pub const RECORDS_TABLE: &str = "records";
/// Metadata projections used for listing and retention
pub const INDEX_TABLE: &str = "index";
/// The persisted encryption key
pub const KEYS_TABLE: &str = "keys";

/// Async key/value store organised in named tables
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Fetch the value stored under `key`
    async fn get(&self, table: &str, key: &str) -> SnapkeepResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, table: &str, key: &str, value: &[u8]) -> SnapkeepResult<()>;

    /// Remove `key`, returning whether it existed
    async fn delete(&self, table: &str, key: &str) -> SnapkeepResult<bool>;

    /// All keys in `table`, sorted
    async fn keys(&self, table: &str) -> SnapkeepResult<Vec<String>>;
}

fn check_key(table: &str, key: &str) -> SnapkeepResult<()> {
    if !is_valid_key(table) {
        return Err(SnapkeepError::StorageFailure(format!("Invalid table name: {:?}", table)));
    }
    if !is_valid_key(key) {
        return Err(SnapkeepError::StorageFailure(format!("Invalid key: {:?}", key)));
    }
    Ok(())
}

/// Backend storing one JSON file per key under `<root>/<table>/<key>.json`
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Create a new FileBackend rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, table: &str, key: &str) -> PathBuf {
        self.root.join(table).join(format!("{}.json", key))
    }
}

#[async_trait]
impl KvBackend for FileBackend {
    async fn get(&self, table: &str, key: &str) -> SnapkeepResult<Option<Vec<u8>>> {
        check_key(table, key)?;
        read_bytes_optional(self.path_for(table, key)).await
    }

    async fn put(&self, table: &str, key: &str, value: &[u8]) -> SnapkeepResult<()> {
        check_key(table, key)?;
        write_bytes_atomic(self.path_for(table, key), value).await
    }

    async fn delete(&self, table: &str, key: &str) -> SnapkeepResult<bool> {
        check_key(table, key)?;
        let path = self.path_for(table, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SnapkeepError::StorageFailure(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn keys(&self, table: &str) -> SnapkeepResult<Vec<String>> {
        check_key(table, "_")?;
        let dir = self.root.join(table);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SnapkeepError::StorageFailure(format!(
                    "Failed to read {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            SnapkeepError::StorageFailure(format!("Failed to read directory entry: {}", e))
        })? {
            let name = entry.file_name().to_string_lossy().to_string();
            // Leftover temp files end in ".json.tmp" and are skipped here
            if let Some(key) = name.strip_suffix(".json") {
                if is_valid_key(key) {
                    keys.push(key.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// Backend keeping everything in process memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create an empty MemoryBackend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, table: &str, key: &str) -> SnapkeepResult<Option<Vec<u8>>> {
        check_key(table, key)?;
        let tables = self.tables.read().map_err(|e| {
            SnapkeepError::StorageFailure(format!("Failed to acquire read lock: {}", e))
        })?;
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn put(&self, table: &str, key: &str, value: &[u8]) -> SnapkeepResult<()> {
        check_key(table, key)?;
        let mut tables = self.tables.write().map_err(|e| {
            SnapkeepError::StorageFailure(format!("Failed to acquire write lock: {}", e))
        })?;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> SnapkeepResult<bool> {
        check_key(table, key)?;
        let mut tables = self.tables.write().map_err(|e| {
            SnapkeepError::StorageFailure(format!("Failed to acquire write lock: {}", e))
        })?;
        Ok(tables
            .get_mut(table)
            .map(|t| t.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn keys(&self, table: &str) -> SnapkeepResult<Vec<String>> {
        let tables = self.tables.read().map_err(|e| {
            SnapkeepError::StorageFailure(format!("Failed to acquire read lock: {}", e))
        })?;
        Ok(tables
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise(backend: &dyn KvBackend) {
        assert!(backend.get("records", "a").await.unwrap().is_none());
        assert!(backend.keys("records").await.unwrap().is_empty());

        backend.put("records", "b", b"two").await.unwrap();
        backend.put("records", "a", b"one").await.unwrap();
        backend.put("index", "a", b"meta").await.unwrap();

        assert_eq!(backend.get("records", "a").await.unwrap().unwrap(), b"one");
        assert_eq!(backend.keys("records").await.unwrap(), vec!["a", "b"]);
        assert_eq!(backend.keys("index").await.unwrap(), vec!["a"]);

        backend.put("records", "a", b"uno").await.unwrap();
        assert_eq!(backend.get("records", "a").await.unwrap().unwrap(), b"uno");

        assert!(backend.delete("records", "a").await.unwrap());
        assert!(!backend.delete("records", "a").await.unwrap());
        assert_eq!(backend.keys("records").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_memory_backend() {
        exercise(&MemoryBackend::new()).await;
    }

    #[tokio::test]
    async fn test_file_backend() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path());
        exercise(&backend).await;
        assert!(temp_dir.path().join("records").join("b.json").exists());
    }

    #[tokio::test]
    async fn test_file_backend_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        FileBackend::new(temp_dir.path())
            .put("keys", "master", b"secret")
            .await
            .unwrap();

        let reopened = FileBackend::new(temp_dir.path());
        assert_eq!(reopened.get("keys", "master").await.unwrap().unwrap(), b"secret");
    }

    #[tokio::test]
    async fn test_file_backend_ignores_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path());
        backend.put("records", "a", b"x").await.unwrap();
        std::fs::write(temp_dir.path().join("records").join("b.json.tmp"), b"partial").unwrap();

        assert_eq!(backend.keys("records").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_keys() {
        let backend = MemoryBackend::new();
        assert!(backend.put("records", "../escape", b"x").await.is_err());

        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path());
        assert!(backend.get("records", "a/b").await.is_err());
    }
}
