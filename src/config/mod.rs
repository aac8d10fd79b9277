//! Configuration module for snapkeep
//!
//! - Path resolution (`SNAPKEEP_DATA_DIR` or the platform data directory)
//! - Engine settings persisted as `config.json`

pub mod paths;
pub mod settings;

pub use paths::SnapkeepPaths;
pub use settings::Settings;
