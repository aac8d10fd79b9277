//! Diagnostics entry data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BackupId, BackupMetadata};

/// Kinds of events written to the diagnostics log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticEvent {
    BackupCreated,
    BackupRestored,
    BackupFailed,
    CorruptionDetected,
    BackupEvicted,
    BackupDeleted,
    BackupExported,
    BackupImported,
    IndexReconciliation,
    KeyCreated,
}

impl std::fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DiagnosticEvent::BackupCreated => "CREATED",
            DiagnosticEvent::BackupRestored => "RESTORED",
            DiagnosticEvent::BackupFailed => "FAILED",
            DiagnosticEvent::CorruptionDetected => "CORRUPTION",
            DiagnosticEvent::BackupEvicted => "EVICTED",
            DiagnosticEvent::BackupDeleted => "DELETED",
            DiagnosticEvent::BackupExported => "EXPORTED",
            DiagnosticEvent::BackupImported => "IMPORTED",
            DiagnosticEvent::IndexReconciliation => "RECONCILIATION",
            DiagnosticEvent::KeyCreated => "KEY_CREATED",
        };
        f.write_str(label)
    }
}

/// A single diagnostics log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    /// When the event occurred (UTC)
    pub timestamp: DateTime<Utc>,

    pub event: DiagnosticEvent,

    /// Backup the event concerns, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,

    /// Free-form structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl DiagnosticEntry {
    /// Create an entry stamped with the current time
    pub fn new(event: DiagnosticEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            backup_id: None,
            details: None,
        }
    }

    /// Attach the backup the event concerns
    pub fn with_backup(mut self, id: &BackupId) -> Self {
        self.backup_id = Some(id.to_string());
        self
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn backup_created(meta: &BackupMetadata) -> Self {
        Self::new(DiagnosticEvent::BackupCreated)
            .with_backup(&meta.id)
            .with_details(serde_json::json!({
                "kind": meta.kind,
                "size_bytes": meta.size_bytes,
                "compression": meta.compression,
            }))
    }

    pub fn backup_evicted(id: &BackupId, bucket: &str) -> Self {
        Self::new(DiagnosticEvent::BackupEvicted)
            .with_backup(id)
            .with_details(serde_json::json!({ "bucket": bucket }))
    }

    pub fn corruption_detected(id: &BackupId, expected: &str, actual: &str) -> Self {
        Self::new(DiagnosticEvent::CorruptionDetected)
            .with_backup(id)
            .with_details(serde_json::json!({ "expected": expected, "actual": actual }))
    }

    pub fn index_reconciliation(id: &BackupId, problem: &str) -> Self {
        Self::new(DiagnosticEvent::IndexReconciliation)
            .with_backup(id)
            .with_details(serde_json::json!({ "problem": problem }))
    }

    /// Format the entry for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.event
        );

        if let Some(id) = &self.backup_id {
            output.push_str(&format!(" {}", id));
        }

        if let Some(details) = &self.details {
            output.push_str(&format!("\n  Details: {}", details));
        }

        output
    }
}
