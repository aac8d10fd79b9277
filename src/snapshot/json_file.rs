//! Snapshot collaborator backed by a JSON document on disk

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{SnapkeepError, SnapkeepResult};
use crate::storage::file_io::write_bytes_atomic;

use super::{Snapshot, SnapshotApplier, SnapshotProvider};

/// Reads the snapshot to back up from a JSON file, and writes restored
/// snapshots back to one
#[derive(Debug, Clone)]
pub struct JsonFileSnapshot {
    path: PathBuf,
}

impl JsonFileSnapshot {
    /// Create a new JsonFileSnapshot for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the document path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotProvider for JsonFileSnapshot {
    async fn collect(&self) -> SnapkeepResult<Snapshot> {
        let contents = tokio::fs::read(&self.path).await.map_err(|e| {
            SnapkeepError::Io(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        serde_json::from_slice(&contents).map(Snapshot::new).map_err(|e| {
            SnapkeepError::Json(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl SnapshotApplier for JsonFileSnapshot {
    async fn apply(&self, snapshot: Snapshot) -> SnapkeepResult<()> {
        let json = serde_json::to_vec_pretty(&snapshot.into_value())
            .map_err(|e| SnapkeepError::Json(format!("Failed to serialize snapshot: {}", e)))?;
        write_bytes_atomic(&self.path, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_apply_then_collect() {
        let temp_dir = TempDir::new().unwrap();
        let doc = JsonFileSnapshot::new(temp_dir.path().join("state.json"));

        let snapshot = Snapshot::new(json!({"settings": {"theme": "dark"}, "docs": [1, 2]}));
        doc.apply(snapshot.clone()).await.unwrap();

        assert_eq!(doc.collect().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_collect_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let doc = JsonFileSnapshot::new(temp_dir.path().join("missing.json"));
        assert!(matches!(doc.collect().await, Err(SnapkeepError::Io(_))));
    }
}
