//! Custom error types for snapkeep
//!
//! This module defines the error hierarchy for the engine using thiserror
//! for ergonomic error definitions.

use thiserror::Error;

/// The main error type for snapkeep operations
#[derive(Error, Debug)]
pub enum SnapkeepError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Validation errors for identifiers and imported data
    #[error("Validation error: {0}")]
    Validation(String),

    /// Snapshot encoding or decoding failed
    #[error("Codec error: {0}")]
    Codec(String),

    /// Another backup creation is still running
    #[error("A backup is already in progress")]
    BackupInProgress,

    /// Sealed payload exceeds the configured maximum
    #[error("Backup too large: {size} bytes exceeds the limit of {max} bytes")]
    BackupTooLarge { size: u64, max: u64 },

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Duplicate entity errors
    #[error("{entity_type} already exists: {identifier}")]
    Duplicate {
        entity_type: &'static str,
        identifier: String,
    },

    /// Stored record does not match its checksum, or no longer decodes
    #[error("Integrity violation for backup {id}: expected {expected}, got {actual}")]
    IntegrityViolation {
        id: String,
        expected: String,
        actual: String,
    },

    /// Key missing or malformed, or the ciphertext failed authentication
    #[error("Decryption failure: {0}")]
    DecryptionFailure(String),

    /// Encryption errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Persistence layer unavailable or failed
    #[error("Storage error: {0}")]
    StorageFailure(String),

    /// Import errors
    #[error("Import error: {0}")]
    Import(String),

    /// Export errors
    #[error("Export error: {0}")]
    Export(String),
}

impl SnapkeepError {
    /// Create a "not found" error for backups
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a "duplicate" error for backups
    pub fn duplicate_backup(identifier: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create an integrity violation for a stored record that fails to decode
    pub fn unreadable_record(id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::IntegrityViolation {
            id: id.into(),
            expected: "a decodable record".to_string(),
            actual: format!("unreadable record ({})", reason),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is an integrity violation
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::IntegrityViolation { .. })
    }

    /// Whether the caller may retry the same request later unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackupInProgress | Self::StorageFailure(_))
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for SnapkeepError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SnapkeepError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for snapkeep operations
pub type SnapkeepResult<T> = Result<T, SnapkeepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SnapkeepError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_not_found_error() {
        let err = SnapkeepError::backup_not_found("bk-123");
        assert_eq!(err.to_string(), "Backup not found: bk-123");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_too_large_error() {
        let err = SnapkeepError::BackupTooLarge { size: 2048, max: 1024 };
        assert_eq!(
            err.to_string(),
            "Backup too large: 2048 bytes exceeds the limit of 1024 bytes"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_in_progress_is_retryable() {
        assert!(SnapkeepError::BackupInProgress.is_retryable());
        assert!(SnapkeepError::StorageFailure("disk gone".into()).is_retryable());
        assert!(!SnapkeepError::DecryptionFailure("bad key".into()).is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SnapkeepError = io_err.into();
        assert!(matches!(err, SnapkeepError::Io(_)));
    }
}
