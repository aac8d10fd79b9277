//! Backup record and metadata models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::CompressionAlgorithm;

use super::ids::BackupId;

/// What triggered a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Requested by a user or caller
    Manual,
    /// Created by the scheduler
    Automatic,
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupKind::Manual => write!(f, "manual"),
            BackupKind::Automatic => write!(f, "automatic"),
        }
    }
}

/// One immutable backup, payload included
///
/// `payload` holds sealed bytes only and `checksum` is the digest of exactly
/// those bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Size of the sealed payload
    pub size_bytes: u64,
    pub compressed: bool,
    #[serde(default)]
    pub compression: CompressionAlgorithm,
    /// Lower-case hex SHA-256 of `payload`
    pub checksum: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl BackupRecord {
    /// Project the record onto its metadata
    pub fn metadata(&self) -> BackupMetadata {
        BackupMetadata {
            id: self.id.clone(),
            created_at: self.created_at,
            kind: self.kind,
            description: self.description.clone(),
            size_bytes: self.size_bytes,
            compressed: self.compressed,
            compression: self.compression,
            checksum: self.checksum.clone(),
        }
    }
}

/// A [`BackupRecord`] without its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: BackupId,
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
}

impl BackupMetadata {
    /// Age of the backup relative to `now`, never negative
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        let age = now.signed_duration_since(self.created_at);
        if age < chrono::Duration::zero() {
            chrono::Duration::zero()
        } else {
            age
        }
    }
}

/// Serde adapter storing byte vectors as standard base64 strings
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> BackupRecord {
        let created_at = Utc.timestamp_millis_opt(1_732_717_822_456).unwrap();
        BackupRecord {
            id: BackupId::generate(created_at),
            created_at,
            kind: BackupKind::Manual,
            description: Some("before upgrade".to_string()),
            size_bytes: 4,
            compressed: true,
            compression: CompressionAlgorithm::Zstd,
            checksum: "abcd".to_string(),
            payload: vec![0, 159, 146, 150],
        }
    }

    #[test]
    fn test_record_serialization_format() {
        let record = sample_record();
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();

        assert_eq!(json["created_at"], 1_732_717_822_456i64);
        assert_eq!(json["kind"], "manual");
        assert_eq!(json["compression"], "zstd");
        assert_eq!(json["payload"], "AJ+Slg==");

        let back: BackupRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_metadata_projection() {
        let record = sample_record();
        let meta = record.metadata();
        assert_eq!(meta.id, record.id);
        assert_eq!(meta.checksum, record.checksum);
        assert_eq!(meta.size_bytes, 4);

        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn test_age_is_clamped() {
        let meta = sample_record().metadata();
        let before = meta.created_at - chrono::Duration::hours(1);
        assert_eq!(meta.age_at(before), chrono::Duration::zero());
        let after = meta.created_at + chrono::Duration::hours(1);
        assert_eq!(meta.age_at(after), chrono::Duration::hours(1));
    }

    #[test]
    fn test_rejects_invalid_base64_payload() {
        let mut json = serde_json::to_value(sample_record()).unwrap();
        json["payload"] = serde_json::Value::String("***".to_string());
        assert!(serde_json::from_value::<BackupRecord>(json).is_err());
    }
}
