//! Backup orchestrator
//!
//! [`BackupEngine`] owns the codec, the crypto envelope, the backup store,
//! the retention manager and the diagnostics log. Construct it once and
//! share it as `Arc<BackupEngine>`.
//!
//! Create pipeline: encode, seal, size check, checksum, store, log. Restore
//! pipeline: fetch, verify checksum, open, decode. A checksum mismatch stops
//! a restore before anything is decrypted.
//!
//! Only one creation runs at a time. A second `create_*` call while one is
//! running fails immediately with `BackupInProgress`.

mod state;
mod transfer;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::config::Settings;
use crate::crypto::{self, CryptoEnvelope};
use crate::diagnostics::{DiagnosticEntry, DiagnosticEvent, DiagnosticsLog};
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::models::{BackupId, BackupKind, BackupMetadata, BackupRecord};
use crate::retention::{PlannedEviction, RetentionManager, RetentionReport};
use crate::snapshot::{Snapshot, SnapshotProvider};
use crate::storage::file_io::write_bytes_atomic;
use crate::storage::{BackupStore, KvBackend, ReconciliationReport, StorageUsage};

pub use state::BackupState;
pub use transfer::{ExportEnvelope, EXPORT_FORMAT, EXPORT_VERSION};

use state::CreationGuard;

/// Result of an integrity scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Number of records whose checksum was recomputed
    pub checked: usize,
    /// Records whose payload no longer matches its checksum
    pub corrupted: Vec<BackupId>,
    /// Index entries whose record could not be found
    pub missing: Vec<BackupId>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.corrupted.is_empty() && self.missing.is_empty()
    }
}

/// The backup and retention engine
pub struct BackupEngine {
    settings: Settings,
    codec: Codec,
    crypto: CryptoEnvelope,
    store: Arc<BackupStore>,
    retention: RetentionManager,
    diagnostics: Arc<DiagnosticsLog>,
    in_progress: AtomicBool,
    state: RwLock<BackupState>,
    last_created_at: Mutex<Option<DateTime<Utc>>>,
}

impl BackupEngine {
    /// Build an engine over `backend`
    pub fn open(
        settings: Settings,
        backend: Arc<dyn KvBackend>,
        diagnostics: Arc<DiagnosticsLog>,
    ) -> SnapkeepResult<Self> {
        settings.validate()?;

        let store = Arc::new(BackupStore::new(
            Arc::clone(&backend),
            Arc::clone(&diagnostics),
            settings.storage_quota_bytes,
        ));
        let retention = RetentionManager::new(
            Arc::clone(&store),
            settings.retention,
            Arc::clone(&diagnostics),
        );
        let crypto = CryptoEnvelope::new(backend, settings.key_derivation, Arc::clone(&diagnostics));
        let codec = Codec::new(
            settings.compression_enabled,
            settings.compression_algorithm,
            settings.zstd_level,
        );

        Ok(Self {
            settings,
            codec,
            crypto,
            store,
            retention,
            diagnostics,
            in_progress: AtomicBool::new(false),
            state: RwLock::new(BackupState::Idle),
            last_created_at: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn diagnostics(&self) -> &DiagnosticsLog {
        &self.diagnostics
    }

    /// Stage of the current or most recent creation
    pub fn state(&self) -> BackupState {
        self.state.read().map(|s| *s).unwrap_or(BackupState::Failed)
    }

    /// Whether a creation currently holds the writer slot
    pub fn is_busy(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Create a backup of `snapshot`
    pub async fn create_backup(
        &self,
        snapshot: Snapshot,
        kind: BackupKind,
        description: Option<String>,
    ) -> SnapkeepResult<BackupId> {
        let _guard = CreationGuard::acquire(&self.in_progress)?;
        let result = self.run_pipeline(snapshot, kind, description).await;
        self.finish(result).await
    }

    /// Collect a snapshot from `provider` and back it up
    ///
    /// The writer slot is held from collection on, so two providers are
    /// never asked for state at the same time.
    pub async fn create_from_provider(
        &self,
        provider: &dyn SnapshotProvider,
        kind: BackupKind,
        description: Option<String>,
    ) -> SnapkeepResult<BackupId> {
        let _guard = CreationGuard::acquire(&self.in_progress)?;
        self.set_state(BackupState::Collecting);
        let result = match provider.collect().await {
            Ok(snapshot) => self.run_pipeline(snapshot, kind, description).await,
            Err(e) => Err(e),
        };
        self.finish(result).await
    }

    async fn run_pipeline(
        &self,
        snapshot: Snapshot,
        kind: BackupKind,
        description: Option<String>,
    ) -> SnapkeepResult<BackupMetadata> {
        self.set_state(BackupState::Encoding);
        let codec = self.codec.clone();
        let encoded = tokio::task::spawn_blocking(move || codec.encode(&snapshot))
            .await
            .map_err(|e| SnapkeepError::Codec(format!("Encoding task failed: {}", e)))??;

        self.set_state(BackupState::Sealing);
        let payload = self.crypto.seal(&encoded.bytes).await?;

        let size_bytes = payload.len() as u64;
        let max = self.settings.max_backup_size_bytes;
        if size_bytes > max {
            return Err(SnapkeepError::BackupTooLarge {
                size: size_bytes,
                max,
            });
        }

        let checksum = crypto::checksum(&payload);

        self.set_state(BackupState::Storing);
        let created_at = self.next_created_at()?;
        let record = BackupRecord {
            id: BackupId::generate(created_at),
            created_at,
            kind,
            description,
            size_bytes,
            compressed: encoded.compression.is_compressed(),
            compression: encoded.compression,
            checksum,
            payload,
        };

        self.store.put(&record).await?;

        let meta = record.metadata();
        info!(
            id = %meta.id,
            kind = %meta.kind,
            size_bytes = meta.size_bytes,
            compression = %meta.compression,
            "Backup created"
        );
        self.diagnostics
            .record(DiagnosticEntry::backup_created(&meta))
            .await;
        Ok(meta)
    }

    async fn finish(&self, result: SnapkeepResult<BackupMetadata>) -> SnapkeepResult<BackupId> {
        match result {
            Ok(meta) => {
                self.set_state(BackupState::Completed);
                Ok(meta.id)
            }
            Err(e) => {
                self.set_state(BackupState::Failed);
                warn!(error = %e, "Backup creation failed");
                self.diagnostics
                    .record(
                        DiagnosticEntry::new(DiagnosticEvent::BackupFailed)
                            .with_details(serde_json::json!({ "error": e.to_string() })),
                    )
                    .await;
                Err(e)
            }
        }
    }

    fn set_state(&self, next: BackupState) {
        if let Ok(mut state) = self.state.write() {
            let previous = *state;
            debug!(from = %previous, to = %next, "Backup state change");
            *state = next;
        }
    }

    /// Millisecond timestamp strictly after the previous one from this engine
    fn next_created_at(&self) -> SnapkeepResult<DateTime<Utc>> {
        let mut last = self.last_created_at.lock().map_err(|e| {
            SnapkeepError::StorageFailure(format!("Failed to acquire timestamp lock: {}", e))
        })?;

        let now = Utc::now().trunc_subsecs(3);
        let next = match *last {
            Some(prev) if now <= prev => prev + Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(next);
        Ok(next)
    }

    /// Restore the snapshot stored in backup `id`
    ///
    /// The caller applies the snapshot; the engine never touches
    /// application state itself.
    pub async fn restore_backup(&self, id: &BackupId) -> SnapkeepResult<Snapshot> {
        let record = self.load_record(id).await?;
        self.check_integrity(&record).await?;

        let plaintext = self.crypto.open(&record.payload).await?;
        let codec = self.codec.clone();
        let compressed = record.compressed;
        let snapshot = tokio::task::spawn_blocking(move || codec.decode(&plaintext, compressed))
            .await
            .map_err(|e| SnapkeepError::Codec(format!("Decoding task failed: {}", e)))??;

        info!(id = %id, "Backup restored");
        self.diagnostics
            .record(DiagnosticEntry::new(DiagnosticEvent::BackupRestored).with_backup(id))
            .await;
        Ok(snapshot)
    }

    /// Verify the checksum of backup `id` without decrypting it
    pub async fn verify_backup(&self, id: &BackupId) -> SnapkeepResult<BackupMetadata> {
        let record = self.load_record(id).await?;
        self.check_integrity(&record).await?;
        Ok(record.metadata())
    }

    /// Delete backup `id` on explicit request
    pub async fn delete_backup(&self, id: &BackupId) -> SnapkeepResult<()> {
        if !self.store.delete(id).await? {
            return Err(SnapkeepError::backup_not_found(id.as_str()));
        }
        info!(id = %id, "Backup deleted");
        self.diagnostics
            .record(DiagnosticEntry::new(DiagnosticEvent::BackupDeleted).with_backup(id))
            .await;
        Ok(())
    }

    /// Metadata of every backup, oldest first
    pub async fn list_backups(&self) -> SnapkeepResult<Vec<BackupMetadata>> {
        self.store.list_metadata().await
    }

    pub async fn get_metadata(&self, id: &BackupId) -> SnapkeepResult<BackupMetadata> {
        self.store
            .get_metadata(id)
            .await?
            .ok_or_else(|| SnapkeepError::backup_not_found(id.as_str()))
    }

    /// The most recent backup, if any
    pub async fn latest_backup(&self) -> SnapkeepResult<Option<BackupMetadata>> {
        Ok(self.store.list_metadata().await?.pop())
    }

    /// Package backup `id` for transfer
    ///
    /// Corrupted records are not exported.
    pub async fn export_backup(&self, id: &BackupId) -> SnapkeepResult<ExportEnvelope> {
        let record = self.load_record(id).await?;
        self.check_integrity(&record).await?;

        self.diagnostics
            .record(DiagnosticEntry::new(DiagnosticEvent::BackupExported).with_backup(id))
            .await;
        Ok(ExportEnvelope::from_record(&record))
    }

    /// Export backup `id` as a JSON file at `path`
    pub async fn export_to_file(&self, id: &BackupId, path: &Path) -> SnapkeepResult<()> {
        let envelope = self.export_backup(id).await?;
        let json = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| SnapkeepError::Export(format!("Failed to serialize export: {}", e)))?;
        write_bytes_atomic(path, &json)
            .await
            .map_err(|e| SnapkeepError::Export(format!("Failed to write {}: {}", path.display(), e)))?;
        info!(id = %id, path = %path.display(), "Backup exported");
        Ok(())
    }

    /// Accept an exported backup into the store
    ///
    /// The checksum is recomputed from the payload and must match the one in
    /// the envelope. Existing ids are never overwritten.
    pub async fn import_backup(&self, envelope: ExportEnvelope) -> SnapkeepResult<BackupId> {
        let record = envelope.into_record()?;

        if !crypto::verify(&record.payload, &record.checksum) {
            warn!(id = %record.id, "Imported backup failed checksum verification");
            return Err(SnapkeepError::IntegrityViolation {
                id: record.id.to_string(),
                actual: crypto::checksum(&record.payload),
                expected: record.checksum,
            });
        }

        let max = self.settings.max_backup_size_bytes;
        if record.size_bytes > max {
            return Err(SnapkeepError::BackupTooLarge {
                size: record.size_bytes,
                max,
            });
        }

        if self.store.contains(&record.id).await? {
            return Err(SnapkeepError::duplicate_backup(record.id.as_str()));
        }

        self.store.put(&record).await?;

        info!(id = %record.id, "Backup imported");
        self.diagnostics
            .record(DiagnosticEntry::new(DiagnosticEvent::BackupImported).with_backup(&record.id))
            .await;
        Ok(record.id)
    }

    /// Import an export file written by [`BackupEngine::export_to_file`]
    pub async fn import_from_file(&self, path: &Path) -> SnapkeepResult<BackupId> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SnapkeepError::Import(format!("Failed to read {}: {}", path.display(), e)))?;
        let envelope: ExportEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| SnapkeepError::Import(format!("Invalid export file: {}", e)))?;
        self.import_backup(envelope).await
    }

    /// Recompute the checksum of every stored record
    ///
    /// Mismatches and records that no longer decode are logged and reported.
    /// Corrupted records are left in place for inspection.
    pub async fn scan_integrity(&self) -> SnapkeepResult<IntegrityReport> {
        let mut report = IntegrityReport::default();

        for meta in self.store.list_metadata().await? {
            let record = match self.store.get(&meta.id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(id = %meta.id, "Indexed backup has no record");
                    self.diagnostics
                        .record(DiagnosticEntry::index_reconciliation(
                            &meta.id,
                            "index entry has no record",
                        ))
                        .await;
                    report.missing.push(meta.id);
                    continue;
                }
                Err(e) if e.is_integrity_violation() => {
                    report.checked += 1;
                    self.report_unreadable(&meta.id, &e).await;
                    report.corrupted.push(meta.id);
                    continue;
                }
                Err(e) => return Err(e),
            };

            report.checked += 1;
            if self.check_integrity(&record).await.is_err() {
                report.corrupted.push(record.id);
            }
        }

        info!(
            checked = report.checked,
            corrupted = report.corrupted.len(),
            missing = report.missing.len(),
            "Integrity scan finished"
        );
        Ok(report)
    }

    /// Current usage against the configured quota
    pub async fn usage(&self) -> SnapkeepResult<StorageUsage> {
        self.store.estimate_usage().await
    }

    /// Run retention early when usage reaches the quota threshold
    pub async fn check_quota(&self) -> SnapkeepResult<Option<RetentionReport>> {
        let usage = self.store.estimate_usage().await?;
        if !usage.exceeds(self.settings.quota_threshold_percent) {
            debug!(
                used_bytes = usage.used_bytes,
                quota_bytes = usage.quota_bytes,
                "Storage usage below threshold"
            );
            return Ok(None);
        }

        info!(
            used_bytes = usage.used_bytes,
            quota_bytes = usage.quota_bytes,
            threshold_percent = self.settings.quota_threshold_percent,
            "Storage usage above threshold, running retention"
        );
        Ok(Some(self.retention.run_retention().await?))
    }

    pub async fn run_retention(&self) -> SnapkeepResult<RetentionReport> {
        self.retention.run_retention().await
    }

    pub async fn run_retention_at(&self, now: DateTime<Utc>) -> SnapkeepResult<RetentionReport> {
        self.retention.run_retention_at(now).await
    }

    /// Evictions retention would perform at `now`
    pub async fn plan_retention(&self, now: DateTime<Utc>) -> SnapkeepResult<Vec<PlannedEviction>> {
        self.retention.plan(now).await
    }

    /// Compare the record table with the metadata index
    pub async fn reconcile_index(&self) -> SnapkeepResult<ReconciliationReport> {
        self.store.reconcile().await
    }

    /// Rewrite the metadata index from the record table
    pub async fn rebuild_index(&self) -> SnapkeepResult<usize> {
        self.store.rebuild_index().await
    }

    /// Whether an automatic backup is due at `now`
    pub async fn auto_backup_due(&self, now: DateTime<Utc>) -> SnapkeepResult<bool> {
        let interval_ms = self.settings.auto_backup_interval_ms;
        if interval_ms == 0 {
            return Ok(false);
        }

        let newest = self
            .store
            .list_metadata()
            .await?
            .into_iter()
            .filter(|m| m.kind == BackupKind::Automatic)
            .map(|m| m.created_at)
            .max();

        Ok(match newest {
            None => true,
            Some(created_at) => u64::try_from(now.signed_duration_since(created_at).num_milliseconds())
                .map_or(false, |elapsed| elapsed >= interval_ms),
        })
    }

    /// Create an automatic backup from `provider` if one is due
    pub async fn maybe_auto_backup(
        &self,
        provider: &dyn SnapshotProvider,
    ) -> SnapkeepResult<Option<BackupId>> {
        if !self.auto_backup_due(Utc::now()).await? {
            return Ok(None);
        }
        self.create_from_provider(provider, BackupKind::Automatic, None)
            .await
            .map(Some)
    }

    async fn load_record(&self, id: &BackupId) -> SnapkeepResult<BackupRecord> {
        match self.store.get(id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(SnapkeepError::backup_not_found(id.as_str())),
            Err(e) => {
                if e.is_integrity_violation() {
                    self.report_unreadable(id, &e).await;
                }
                Err(e)
            }
        }
    }

    async fn report_unreadable(&self, id: &BackupId, err: &SnapkeepError) {
        warn!(id = %id, error = %err, "Stored record is unreadable");
        if let SnapkeepError::IntegrityViolation {
            expected, actual, ..
        } = err
        {
            self.diagnostics
                .record(DiagnosticEntry::corruption_detected(id, expected, actual))
                .await;
        }
    }

    async fn check_integrity(&self, record: &BackupRecord) -> SnapkeepResult<()> {
        if crypto::verify(&record.payload, &record.checksum) {
            return Ok(());
        }

        let actual = crypto::checksum(&record.payload);
        warn!(id = %record.id, expected = %record.checksum, actual = %actual, "Checksum mismatch");
        self.diagnostics
            .record(DiagnosticEntry::corruption_detected(
                &record.id,
                &record.checksum,
                &actual,
            ))
            .await;
        Err(SnapkeepError::IntegrityViolation {
            id: record.id.to_string(),
            expected: record.checksum.clone(),
            actual,
        })
    }
}
