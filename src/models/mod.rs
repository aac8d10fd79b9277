//! Core data models for snapkeep
//!
//! This module contains the structures the engine persists: backup records,
//! their metadata projections and identifiers.

pub mod backup;
pub mod ids;

pub use backup::{BackupKind, BackupMetadata, BackupRecord};
pub use ids::BackupId;
