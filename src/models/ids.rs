//! Backup identifiers
//!
//! A backup id combines the creation time with a random suffix, so ids sort
//! roughly by age and stay unique for the lifetime of a store. Ids double as
//! storage keys, which restricts them to a file-name-safe alphabet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SnapkeepError;

const PREFIX: &str = "bk-";
const MAX_LEN: usize = 128;

/// Identifier of a single backup record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackupId(String);

impl BackupId {
    /// Generate a fresh id for a backup created at `created_at`
    pub fn generate(created_at: DateTime<Utc>) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}{}-{}",
            PREFIX,
            created_at.format("%Y%m%dT%H%M%S%3f"),
            &random[..8]
        ))
    }

    /// Parse an id, rejecting anything that is not safe as a storage key
    pub fn parse(s: &str) -> Result<Self, SnapkeepError> {
        if !is_valid_key(s) {
            return Err(SnapkeepError::Validation(format!("Invalid backup id: {:?}", s)));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether `s` may be used as a storage key
pub fn is_valid_key(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BackupId {
    type Err = SnapkeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BackupId {
    type Error = SnapkeepError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if !is_valid_key(&s) {
            return Err(SnapkeepError::Validation(format!("Invalid backup id: {:?}", s)));
        }
        Ok(Self(s))
    }
}

impl From<BackupId> for String {
    fn from(id: BackupId) -> Self {
        id.0
    }
}

impl AsRef<str> for BackupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_contains_timestamp() {
        let at = Utc.with_ymd_and_hms(2025, 11, 27, 14, 30, 22).unwrap();
        let id = BackupId::generate(at);
        assert!(id.as_str().starts_with("bk-20251127T143022000-"));
        assert_eq!(id.as_str().len(), "bk-20251127T143022000-".len() + 8);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let at = Utc::now();
        assert_ne!(BackupId::generate(at), BackupId::generate(at));
    }

    #[test]
    fn test_parse_rejects_path_traversal() {
        assert!(BackupId::parse("../etc/passwd").is_err());
        assert!(BackupId::parse("a/b").is_err());
        assert!(BackupId::parse("").is_err());
        assert!(BackupId::parse(".hidden").is_err());
        assert!(BackupId::parse("bk-20250101T000000000-abcdef01").is_ok());
    }

    #[test]
    fn test_id_serialization() {
        let id = BackupId::generate(Utc::now());
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: BackupId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);

        assert!(serde_json::from_str::<BackupId>("\"../x\"").is_err());
    }
}
