//! Diagnostics log for snapkeep
//!
//! Records backup lifecycle events (creation, restoration, corruption,
//! eviction, ...) in an append-only log consumed by external monitoring.
//!
//! - `DiagnosticEntry`: one event with timestamp, backup id and details.
//! - `DiagnosticsLog`: writes entries as JSON lines to a file, or keeps them
//!   in memory.

mod entry;
mod logger;

pub use entry::{DiagnosticEntry, DiagnosticEvent};
pub use logger::DiagnosticsLog;
