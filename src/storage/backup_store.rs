//! Backup record table plus metadata index
//!
//! Full records live in the `records` table, payload included. A metadata
//! projection of each record lives in the `index` table so listing and
//! retention never load payloads. The two are written as a pair but without
//! a transaction: the index is authoritative for listing, the record table
//! for restore, and any asymmetry is reported as an index reconciliation
//! event.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::diagnostics::{DiagnosticEntry, DiagnosticsLog};
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::models::{BackupId, BackupMetadata, BackupRecord};

use super::backend::{KvBackend, INDEX_TABLE, RECORDS_TABLE};

/// Estimated storage consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

impl StorageUsage {
    /// Usage as a percentage of the quota
    pub fn percent_used(&self) -> f64 {
        if self.quota_bytes == 0 {
            return 100.0;
        }
        self.used_bytes as f64 * 100.0 / self.quota_bytes as f64
    }

    /// Whether usage has reached `threshold_percent` of the quota
    pub fn exceeds(&self, threshold_percent: u8) -> bool {
        self.percent_used() >= f64::from(threshold_percent)
    }
}

/// Ids present in only one of the two tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Records with no index entry (invisible to listing and retention)
    pub missing_index: Vec<BackupId>,
    /// Index entries with no record (listed but not restorable)
    pub missing_record: Vec<BackupId>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_index.is_empty() && self.missing_record.is_empty()
    }
}

/// The only component that writes backup records
pub struct BackupStore {
    backend: Arc<dyn KvBackend>,
    diagnostics: Arc<DiagnosticsLog>,
    quota_bytes: u64,
}

impl BackupStore {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        diagnostics: Arc<DiagnosticsLog>,
        quota_bytes: u64,
    ) -> Self {
        Self {
            backend,
            diagnostics,
            quota_bytes,
        }
    }

    /// Persist a record and its index entry
    ///
    /// If the index write fails the record is removed again, so a failed put
    /// leaves nothing behind unless the rollback fails as well.
    pub async fn put(&self, record: &BackupRecord) -> SnapkeepResult<()> {
        let key = record.id.as_str();
        let record_json = serde_json::to_vec(record)
            .map_err(|e| SnapkeepError::Json(format!("Failed to serialize record: {}", e)))?;
        let meta_json = serde_json::to_vec(&record.metadata())
            .map_err(|e| SnapkeepError::Json(format!("Failed to serialize metadata: {}", e)))?;

        self.backend
            .put(RECORDS_TABLE, key, &record_json)
            .await
            .map_err(into_storage_failure)?;

        if let Err(index_err) = self.backend.put(INDEX_TABLE, key, &meta_json).await {
            if let Err(rollback_err) = self.backend.delete(RECORDS_TABLE, key).await {
                self.reconciliation_warning(
                    &record.id,
                    &format!(
                        "index write failed ({}) and record rollback failed ({})",
                        index_err, rollback_err
                    ),
                )
                .await;
            }
            return Err(SnapkeepError::StorageFailure(format!(
                "Failed to write index entry for {}: {}",
                key, index_err
            )));
        }

        debug!(id = %record.id, size_bytes = record.size_bytes, "Stored backup record");
        Ok(())
    }

    /// Load a full record from the record table
    ///
    /// A stored record that no longer decodes is reported as an integrity
    /// violation, not a storage failure.
    pub async fn get(&self, id: &BackupId) -> SnapkeepResult<Option<BackupRecord>> {
        let Some(bytes) = self
            .backend
            .get(RECORDS_TABLE, id.as_str())
            .await
            .map_err(into_storage_failure)?
        else {
            return Ok(None);
        };

        let record = serde_json::from_slice(&bytes)
            .map_err(|e| SnapkeepError::unreadable_record(id.as_str(), e))?;
        Ok(Some(record))
    }

    /// Whether either table knows `id`
    pub async fn contains(&self, id: &BackupId) -> SnapkeepResult<bool> {
        let key = id.as_str();
        let in_records = self
            .backend
            .get(RECORDS_TABLE, key)
            .await
            .map_err(into_storage_failure)?
            .is_some();
        if in_records {
            return Ok(true);
        }
        Ok(self
            .backend
            .get(INDEX_TABLE, key)
            .await
            .map_err(into_storage_failure)?
            .is_some())
    }

    /// Remove a record and its index entry, returning whether anything existed
    pub async fn delete(&self, id: &BackupId) -> SnapkeepResult<bool> {
        let key = id.as_str();
        let had_record = self
            .backend
            .delete(RECORDS_TABLE, key)
            .await
            .map_err(into_storage_failure)?;

        match self.backend.delete(INDEX_TABLE, key).await {
            Ok(had_index) => {
                if had_record != had_index {
                    self.reconciliation_warning(
                        id,
                        if had_record {
                            "deleted record had no index entry"
                        } else {
                            "deleted index entry had no record"
                        },
                    )
                    .await;
                }
                Ok(had_record || had_index)
            }
            Err(e) => {
                if had_record {
                    self.reconciliation_warning(
                        id,
                        &format!("record deleted but index delete failed ({})", e),
                    )
                    .await;
                }
                Err(into_storage_failure(e))
            }
        }
    }

    /// Metadata of every indexed backup, oldest first
    pub async fn list_metadata(&self) -> SnapkeepResult<Vec<BackupMetadata>> {
        let keys = self
            .backend
            .keys(INDEX_TABLE)
            .await
            .map_err(into_storage_failure)?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(bytes) = self
                .backend
                .get(INDEX_TABLE, &key)
                .await
                .map_err(into_storage_failure)?
            else {
                continue;
            };

            match serde_json::from_slice::<BackupMetadata>(&bytes) {
                Ok(meta) => entries.push(meta),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed index entry"),
            }
        }

        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// Metadata of one backup, from the index
    pub async fn get_metadata(&self, id: &BackupId) -> SnapkeepResult<Option<BackupMetadata>> {
        let Some(bytes) = self
            .backend
            .get(INDEX_TABLE, id.as_str())
            .await
            .map_err(into_storage_failure)?
        else {
            return Ok(None);
        };

        let meta = serde_json::from_slice(&bytes).map_err(|e| {
            SnapkeepError::StorageFailure(format!("Malformed index entry {}: {}", id, e))
        })?;
        Ok(Some(meta))
    }

    /// Sum of sealed sizes of every indexed backup
    pub async fn estimate_usage(&self) -> SnapkeepResult<StorageUsage> {
        let used_bytes = self
            .list_metadata()
            .await?
            .iter()
            .map(|m| m.size_bytes)
            .sum();
        Ok(StorageUsage {
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }

    /// Compare both tables and report ids found in only one of them
    pub async fn reconcile(&self) -> SnapkeepResult<ReconciliationReport> {
        let records = self.key_set(RECORDS_TABLE).await?;
        let index = self.key_set(INDEX_TABLE).await?;

        let mut report = ReconciliationReport::default();
        for key in records.difference(&index) {
            if let Ok(id) = BackupId::parse(key) {
                self.reconciliation_warning(&id, "record has no index entry")
                    .await;
                report.missing_index.push(id);
            }
        }
        for key in index.difference(&records) {
            if let Ok(id) = BackupId::parse(key) {
                self.reconciliation_warning(&id, "index entry has no record")
                    .await;
                report.missing_record.push(id);
            }
        }
        Ok(report)
    }

    /// Rewrite the index from the record table, returning the number of entries
    pub async fn rebuild_index(&self) -> SnapkeepResult<usize> {
        let records = self.key_set(RECORDS_TABLE).await?;

        for key in self.key_set(INDEX_TABLE).await?.difference(&records) {
            self.backend
                .delete(INDEX_TABLE, key)
                .await
                .map_err(into_storage_failure)?;
        }

        let mut count = 0;
        for key in &records {
            let id = BackupId::parse(key)?;
            let record = match self.get(&id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) if e.is_integrity_violation() => {
                    warn!(id = %id, error = %e, "Skipping unreadable record during index rebuild");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let meta_json = serde_json::to_vec(&record.metadata())
                .map_err(|e| SnapkeepError::Json(format!("Failed to serialize metadata: {}", e)))?;
            self.backend
                .put(INDEX_TABLE, key, &meta_json)
                .await
                .map_err(into_storage_failure)?;
            count += 1;
        }
        Ok(count)
    }

    async fn key_set(&self, table: &str) -> SnapkeepResult<BTreeSet<String>> {
        Ok(self
            .backend
            .keys(table)
            .await
            .map_err(into_storage_failure)?
            .into_iter()
            .collect())
    }

    async fn reconciliation_warning(&self, id: &BackupId, problem: &str) {
        warn!(id = %id, problem, "Index reconciliation needed");
        self.diagnostics
            .record(DiagnosticEntry::index_reconciliation(id, problem))
            .await;
    }
}

fn into_storage_failure(err: SnapkeepError) -> SnapkeepError {
    match err {
        SnapkeepError::StorageFailure(_) => err,
        other => SnapkeepError::StorageFailure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CompressionAlgorithm;
    use crate::diagnostics::DiagnosticEvent;
    use crate::models::BackupKind;
    use crate::storage::{FileBackend, MemoryBackend};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    /// Memory backend whose index writes or deletes can be made to fail
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_index_put: AtomicBool,
        fail_index_delete: AtomicBool,
        fail_record_delete: AtomicBool,
    }

    #[async_trait]
    impl KvBackend for FlakyBackend {
        async fn get(&self, table: &str, key: &str) -> SnapkeepResult<Option<Vec<u8>>> {
            self.inner.get(table, key).await
        }

        async fn put(&self, table: &str, key: &str, value: &[u8]) -> SnapkeepResult<()> {
            if table == INDEX_TABLE && self.fail_index_put.load(Ordering::SeqCst) {
                return Err(SnapkeepError::Io("index unavailable".into()));
            }
            self.inner.put(table, key, value).await
        }

        async fn delete(&self, table: &str, key: &str) -> SnapkeepResult<bool> {
            if table == INDEX_TABLE && self.fail_index_delete.load(Ordering::SeqCst) {
                return Err(SnapkeepError::Io("index unavailable".into()));
            }
            if table == RECORDS_TABLE && self.fail_record_delete.load(Ordering::SeqCst) {
                return Err(SnapkeepError::Io("records unavailable".into()));
            }
            self.inner.delete(table, key).await
        }

        async fn keys(&self, table: &str) -> SnapkeepResult<Vec<String>> {
            self.inner.keys(table).await
        }
    }

    fn record(minutes: i64, size: u64) -> BackupRecord {
        let created_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
            + Duration::minutes(minutes);
        BackupRecord {
            id: BackupId::generate(created_at),
            created_at,
            kind: BackupKind::Manual,
            description: None,
            size_bytes: size,
            compressed: false,
            compression: CompressionAlgorithm::None,
            checksum: "00".to_string(),
            payload: vec![0; size as usize],
        }
    }

    fn store_with(backend: Arc<dyn KvBackend>) -> (BackupStore, Arc<DiagnosticsLog>) {
        let diagnostics = Arc::new(DiagnosticsLog::in_memory());
        (
            BackupStore::new(backend, Arc::clone(&diagnostics), 1000),
            diagnostics,
        )
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (store, _) = store_with(Arc::new(MemoryBackend::new()));
        let rec = record(0, 10);

        store.put(&rec).await.unwrap();
        assert_eq!(store.get(&rec.id).await.unwrap(), Some(rec.clone()));
        assert_eq!(store.get_metadata(&rec.id).await.unwrap(), Some(rec.metadata()));
        assert!(store.contains(&rec.id).await.unwrap());

        assert!(store.delete(&rec.id).await.unwrap());
        assert!(store.get(&rec.id).await.unwrap().is_none());
        assert!(store.list_metadata().await.unwrap().is_empty());
        assert!(!store.delete(&rec.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_sorted_by_creation() {
        let (store, _) = store_with(Arc::new(MemoryBackend::new()));
        let later = record(5, 1);
        let earlier = record(1, 1);
        store.put(&later).await.unwrap();
        store.put(&earlier).await.unwrap();

        let listed = store.list_metadata().await.unwrap();
        assert_eq!(listed[0].id, earlier.id);
        assert_eq!(listed[1].id, later.id);
    }

    #[tokio::test]
    async fn test_estimate_usage() {
        let (store, _) = store_with(Arc::new(MemoryBackend::new()));
        store.put(&record(0, 300)).await.unwrap();
        store.put(&record(1, 500)).await.unwrap();

        let usage = store.estimate_usage().await.unwrap();
        assert_eq!(usage.used_bytes, 800);
        assert_eq!(usage.quota_bytes, 1000);
        assert!(usage.exceeds(80));
        assert!(!usage.exceeds(81));
    }

    #[tokio::test]
    async fn test_failed_index_write_rolls_back_record() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_index_put.store(true, Ordering::SeqCst);
        let (store, diagnostics) = store_with(backend.clone());
        let rec = record(0, 10);

        let err = store.put(&rec).await.unwrap_err();
        assert!(matches!(err, SnapkeepError::StorageFailure(_)));
        assert!(store.get(&rec.id).await.unwrap().is_none());
        assert!(diagnostics
            .events_of(DiagnosticEvent::IndexReconciliation)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_index_put.store(true, Ordering::SeqCst);
        backend.fail_record_delete.store(true, Ordering::SeqCst);
        let (store, diagnostics) = store_with(backend.clone());
        let rec = record(0, 10);

        assert!(store.put(&rec).await.is_err());
        let events = diagnostics
            .events_of(DiagnosticEvent::IndexReconciliation)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].backup_id.as_deref(), Some(rec.id.as_str()));

        backend.fail_index_put.store(false, Ordering::SeqCst);
        let report = store.reconcile().await.unwrap();
        assert_eq!(report.missing_index, vec![rec.id.clone()]);
    }

    #[tokio::test]
    async fn test_failed_index_delete_is_reported() {
        let backend = Arc::new(FlakyBackend::default());
        let (store, diagnostics) = store_with(backend.clone());
        let rec = record(0, 10);
        store.put(&rec).await.unwrap();

        backend.fail_index_delete.store(true, Ordering::SeqCst);
        assert!(store.delete(&rec.id).await.is_err());
        assert_eq!(
            diagnostics
                .events_of(DiagnosticEvent::IndexReconciliation)
            .await
                .unwrap()
                .len(),
            1
        );

        // Listing still shows the entry, restore no longer finds it.
        assert_eq!(store.list_metadata().await.unwrap().len(), 1);
        assert!(store.get(&rec.id).await.unwrap().is_none());

        backend.fail_index_delete.store(false, Ordering::SeqCst);
        let report = store.reconcile().await.unwrap();
        assert_eq!(report.missing_record, vec![rec.id.clone()]);
    }

    #[tokio::test]
    async fn test_rebuild_index() {
        let backend = Arc::new(FlakyBackend::default());
        let (store, _) = store_with(backend.clone());
        let kept = record(0, 10);
        let orphan = record(1, 10);
        store.put(&kept).await.unwrap();
        store.put(&orphan).await.unwrap();

        backend.inner.delete(INDEX_TABLE, kept.id.as_str()).await.unwrap();
        backend.inner.delete(RECORDS_TABLE, orphan.id.as_str()).await.unwrap();
        assert!(!store.reconcile().await.unwrap().is_consistent());

        assert_eq!(store.rebuild_index().await.unwrap(), 1);
        assert!(store.reconcile().await.unwrap().is_consistent());
        let listed = store.list_metadata().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept.id);
    }

    #[tokio::test]
    async fn test_undecodable_record_is_integrity_violation() {
        let backend = Arc::new(FlakyBackend::default());
        let (store, _) = store_with(backend.clone());
        let rotted = record(0, 10);
        let intact = record(1, 10);
        store.put(&rotted).await.unwrap();
        store.put(&intact).await.unwrap();

        let raw = backend
            .inner
            .get(RECORDS_TABLE, rotted.id.as_str())
            .await
            .unwrap()
            .unwrap();
        let mut json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        json["payload"] = serde_json::Value::String("AJ%Slg==".to_string());
        backend
            .inner
            .put(RECORDS_TABLE, rotted.id.as_str(), &serde_json::to_vec(&json).unwrap())
            .await
            .unwrap();

        let err = store.get(&rotted.id).await.unwrap_err();
        assert!(err.is_integrity_violation());
        assert!(!err.is_retryable());

        // The rotted record keeps its index entry through a rebuild
        assert_eq!(store.rebuild_index().await.unwrap(), 1);
        assert_eq!(store.list_metadata().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let rec = record(0, 10);
        {
            let (store, _) = store_with(Arc::new(FileBackend::new(temp_dir.path())));
            store.put(&rec).await.unwrap();
        }

        let (store, _) = store_with(Arc::new(FileBackend::new(temp_dir.path())));
        assert_eq!(store.get(&rec.id).await.unwrap(), Some(rec));
        assert_eq!(store.list_metadata().await.unwrap().len(), 1);
    }
}
