//! Retention manager
//!
//! Classifies backups into age buckets (daily, weekly, monthly, yearly) and
//! evicts the oldest excess backups per bucket. Runs read the metadata index
//! only; evictions go through the backup store.

mod policy;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::diagnostics::{DiagnosticEntry, DiagnosticsLog};
use crate::error::SnapkeepResult;
use crate::models::BackupId;
use crate::storage::BackupStore;

pub use policy::{plan_evictions, Bucket, PlannedEviction, RetentionPolicy};

/// Outcome of a retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Evicted backups with the bucket they were evicted from
    pub evicted: Vec<(Bucket, BackupId)>,
}

impl RetentionReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }

    pub fn evicted_from(&self, bucket: Bucket) -> usize {
        self.evicted.iter().filter(|(b, _)| *b == bucket).count()
    }
}

pub struct RetentionManager {
    store: Arc<BackupStore>,
    policy: RetentionPolicy,
    diagnostics: Arc<DiagnosticsLog>,
}

impl RetentionManager {
    pub fn new(
        store: Arc<BackupStore>,
        policy: RetentionPolicy,
        diagnostics: Arc<DiagnosticsLog>,
    ) -> Self {
        Self {
            store,
            policy,
            diagnostics,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Evictions a pass at `now` would perform, without deleting anything
    pub async fn plan(&self, now: DateTime<Utc>) -> SnapkeepResult<Vec<PlannedEviction>> {
        let metadata = self.store.list_metadata().await?;
        Ok(plan_evictions(&metadata, &self.policy, now))
    }

    /// Run a retention pass using the current time
    pub async fn run_retention(&self) -> SnapkeepResult<RetentionReport> {
        self.run_retention_at(Utc::now()).await
    }

    /// Run a retention pass as of `now`
    ///
    /// A failed delete aborts the pass. Evictions already made stay made, and
    /// the next pass picks up where this one stopped.
    pub async fn run_retention_at(&self, now: DateTime<Utc>) -> SnapkeepResult<RetentionReport> {
        let planned = self.plan(now).await?;
        let mut report = RetentionReport::default();

        for eviction in planned {
            self.store.delete(&eviction.id).await?;
            info!(id = %eviction.id, bucket = %eviction.bucket, "Evicted backup");
            self.diagnostics
                .record(DiagnosticEntry::backup_evicted(
                    &eviction.id,
                    eviction.bucket.as_str(),
                ))
                .await;
            report.evicted.push((eviction.bucket, eviction.id));
        }

        Ok(report)
    }
}
