//! Engine settings for snapkeep
//!
//! Stored as `config.json` in the base directory. Every field has a serde
//! default, so a partial file (or none at all) yields a working
//! configuration.

use serde::{Deserialize, Serialize};

use super::paths::SnapkeepPaths;
use crate::codec::CompressionPreference;
use crate::crypto::KeyDerivationSettings;
use crate::error::SnapkeepError;
use crate::retention::RetentionPolicy;
use crate::storage::{read_json, write_json_atomic};

const MIB: u64 = 1024 * 1024;
const HOUR_MS: u64 = 60 * 60 * 1000;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Schema version for migration support
    pub schema_version: u32,

    /// Per-bucket retention counts
    pub retention: RetentionPolicy,

    /// Largest sealed payload accepted by create and import
    pub max_backup_size_bytes: u64,

    /// Minimum time between automatic backups; 0 disables them
    pub auto_backup_interval_ms: u64,

    pub compression_enabled: bool,

    /// Preferred compressor; the other is used as fallback
    pub compression_algorithm: CompressionPreference,

    pub zstd_level: i32,

    /// Period of the integrity scan; 0 disables it
    pub integrity_scan_interval_ms: u64,

    /// Storage quota the quota monitor measures against
    pub storage_quota_bytes: u64,

    /// Usage (percent of quota) at which retention runs preemptively
    pub quota_threshold_percent: u8,

    /// Period of the quota monitor; 0 disables it
    pub quota_check_interval_ms: u64,

    /// How often the automatic backup job checks whether a backup is due
    pub scheduler_tick_ms: u64,

    /// Argon2 costs for a newly generated key
    pub key_derivation: KeyDerivationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            retention: RetentionPolicy::default(),
            max_backup_size_bytes: 10 * MIB,
            auto_backup_interval_ms: 24 * HOUR_MS,
            compression_enabled: true,
            compression_algorithm: CompressionPreference::default(),
            zstd_level: 3,
            integrity_scan_interval_ms: 6 * HOUR_MS,
            storage_quota_bytes: 100 * MIB,
            quota_threshold_percent: 80,
            quota_check_interval_ms: HOUR_MS,
            scheduler_tick_ms: 60 * 1000,
            key_derivation: KeyDerivationSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or default settings if the file doesn't exist
    pub async fn load_or_create(paths: &SnapkeepPaths) -> Result<Self, SnapkeepError> {
        // A missing file yields defaults without being persisted
        let settings: Settings = read_json(paths.settings_file()).await.map_err(|e| {
            SnapkeepError::Config(format!("Failed to load settings: {}", e))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to disk
    pub async fn save(&self, paths: &SnapkeepPaths) -> Result<(), SnapkeepError> {
        paths.ensure_directories().await?;
        write_json_atomic(paths.settings_file(), self).await
    }

    /// Whether backups are written with zstd
    pub fn uses_zstd(&self) -> bool {
        self.compression_enabled && self.compression_algorithm == CompressionPreference::Zstd
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), SnapkeepError> {
        if self.max_backup_size_bytes == 0 {
            return Err(SnapkeepError::Config(
                "max_backup_size_bytes must be greater than zero".into(),
            ));
        }
        if self.storage_quota_bytes == 0 {
            return Err(SnapkeepError::Config(
                "storage_quota_bytes must be greater than zero".into(),
            ));
        }
        if self.quota_threshold_percent > 100 {
            return Err(SnapkeepError::Config(format!(
                "quota_threshold_percent must be at most 100, got {}",
                self.quota_threshold_percent
            )));
        }
        let levels = zstd::compression_level_range();
        if self.uses_zstd() && !levels.contains(&self.zstd_level) {
            return Err(SnapkeepError::Config(format!(
                "zstd_level must be between {} and {}, got {}",
                levels.start(),
                levels.end(),
                self.zstd_level
            )));
        }
        if self.scheduler_tick_ms == 0 {
            return Err(SnapkeepError::Config(
                "scheduler_tick_ms must be greater than zero".into(),
            ));
        }
        self.key_derivation.validate()
    }
}
