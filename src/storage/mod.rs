//! Storage layer for snapkeep
//!
//! Key/value backends with atomic writes, and the backup store built on top
//! of them.

pub mod backend;
pub mod backup_store;
pub mod file_io;

pub use backend::{FileBackend, KvBackend, MemoryBackend, INDEX_TABLE, KEYS_TABLE, RECORDS_TABLE};
pub use backup_store::{BackupStore, ReconciliationReport, StorageUsage};
pub use file_io::{read_json, write_json_atomic};
