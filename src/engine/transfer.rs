//! Portable export envelope
//!
//! An export file carries a complete record, sealed payload included, so it
//! can be imported into a store that shares the original encryption key.
//! The checksum inside is informational: importers recompute it.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::CompressionAlgorithm;
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::models::{BackupId, BackupKind, BackupRecord};

/// Value of the `format` field
pub const EXPORT_FORMAT: &str = "snapkeep-export";
/// Current envelope version
pub const EXPORT_VERSION: u32 = 1;

/// Serialized form of an exported backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub format: String,
    pub version: u32,
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub size_bytes: u64,
    pub compressed: bool,
    #[serde(default)]
    pub compression: CompressionAlgorithm,
    pub checksum: String,
    /// Sealed payload, standard base64
    pub payload: String,
}

impl ExportEnvelope {
    pub fn from_record(record: &BackupRecord) -> Self {
        Self {
            format: EXPORT_FORMAT.to_string(),
            version: EXPORT_VERSION,
            id: record.id.to_string(),
            created_at: record.created_at,
            kind: record.kind,
            description: record.description.clone(),
            size_bytes: record.size_bytes,
            compressed: record.compressed,
            compression: record.compression,
            checksum: record.checksum.clone(),
            payload: STANDARD.encode(&record.payload),
        }
    }

    /// Rebuild the record, checking structure but not the checksum
    pub fn into_record(self) -> SnapkeepResult<BackupRecord> {
        if self.format != EXPORT_FORMAT {
            return Err(SnapkeepError::Import(format!(
                "Unrecognized export format: {:?}",
                self.format
            )));
        }
        if self.version != EXPORT_VERSION {
            return Err(SnapkeepError::Import(format!(
                "Unsupported export version: {}",
                self.version
            )));
        }

        let id = BackupId::parse(&self.id)
            .map_err(|e| SnapkeepError::Import(format!("Invalid backup id: {}", e)))?;

        let payload = STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|e| SnapkeepError::Import(format!("Invalid payload encoding: {}", e)))?;

        if payload.len() as u64 != self.size_bytes {
            return Err(SnapkeepError::Import(format!(
                "Declared size {} does not match payload size {}",
                self.size_bytes,
                payload.len()
            )));
        }

        if self.compressed != self.compression.is_compressed() {
            return Err(SnapkeepError::Import(format!(
                "Compressed flag ({}) disagrees with compression ({})",
                self.compressed, self.compression
            )));
        }

        Ok(BackupRecord {
            id,
            created_at: self.created_at,
            kind: self.kind,
            description: self.description,
            size_bytes: self.size_bytes,
            compressed: self.compressed,
            compression: self.compression,
            checksum: self.checksum,
            payload,
        })
    }
}
