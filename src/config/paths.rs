//! Path management for snapkeep
//!
//! ## Path Resolution Order
//!
//! 1. `SNAPKEEP_DATA_DIR` environment variable (if set)
//! 2. The platform data directory from `directories::ProjectDirs`
//!    (`~/.local/share/snapkeep` on Linux)

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::SnapkeepError;

/// Environment variable overriding the base directory
pub const DATA_DIR_ENV: &str = "SNAPKEEP_DATA_DIR";

/// Manages all paths used by snapkeep
#[derive(Debug, Clone)]
pub struct SnapkeepPaths {
    base_dir: PathBuf,
}

impl SnapkeepPaths {
    /// Resolve the base directory from the environment or the platform
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, SnapkeepError> {
        let base_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => ProjectDirs::from("", "", "snapkeep")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or_else(|| {
                    SnapkeepError::Config("Could not determine a data directory".into())
                })?,
        };

        Ok(Self { base_dir })
    }

    /// Create SnapkeepPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Root of the key/value store (records, index, keys)
    pub fn store_dir(&self) -> PathBuf {
        self.base_dir.join("store")
    }

    /// Get the path to the diagnostics log
    pub fn diagnostics_log(&self) -> PathBuf {
        self.base_dir.join("diagnostics.log")
    }

    /// Ensure the base and store directories exist
    pub async fn ensure_directories(&self) -> Result<(), SnapkeepError> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| SnapkeepError::Io(format!("Failed to create base directory: {}", e)))?;

        tokio::fs::create_dir_all(self.store_dir())
            .await
            .map_err(|e| SnapkeepError::Io(format!("Failed to create store directory: {}", e)))?;

        Ok(())
    }
}
