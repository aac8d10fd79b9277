//! snapkeep - Local encrypted backup and retention engine
//!
//! This library takes point-in-time snapshots of application state,
//! compresses and encrypts them, stores them on local disk and keeps a
//! bounded history under a daily/weekly/monthly/yearly retention policy.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `models`: Backup records, metadata and identifiers
//! - `snapshot`: Snapshot values and the provider/applier seams
//! - `codec`: Serialization and compression
//! - `crypto`: Key management, authenticated encryption and checksums
//! - `storage`: Key-value backends and the indexed backup store
//! - `retention`: Bucketed retention planning and eviction
//! - `diagnostics`: Append-only diagnostic event log
//! - `engine`: The backup orchestrator
//! - `scheduler`: Interval-driven background jobs
//! - `cli`: Command handlers for the `snapkeep` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use snapkeep::config::{SnapkeepPaths, Settings};
//! use snapkeep::diagnostics::DiagnosticsLog;
//! use snapkeep::engine::BackupEngine;
//! use snapkeep::storage::FileBackend;
//!
//! let paths = SnapkeepPaths::new()?;
//! let settings = Settings::load_or_create(&paths).await?;
//! let engine = BackupEngine::open(
//!     settings,
//!     Arc::new(FileBackend::new(paths.store_dir())),
//!     Arc::new(DiagnosticsLog::new(paths.diagnostics_log())),
//! )?;
//! ```

pub mod cli;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod models;
pub mod retention;
pub mod scheduler;
pub mod snapshot;
pub mod storage;

pub use engine::BackupEngine;
pub use error::{SnapkeepError, SnapkeepResult};
