//! Snapshots and the collaborators that produce and consume them
//!
//! A [`Snapshot`] is an opaque tree of scalars, maps and sequences. The
//! engine never looks inside one beyond serializing it; producing state is
//! the job of a [`SnapshotProvider`] and putting restored state back is the
//! job of a [`SnapshotApplier`].

mod json_file;

pub use json_file::JsonFileSnapshot;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SnapkeepError, SnapkeepResult};

/// Application state captured at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Value);

impl Snapshot {
    /// Wrap a JSON value
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// An empty map
    pub fn empty() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    /// Get the underlying value
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the underlying value
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Canonical byte form: compact JSON with map keys in sorted order
    pub fn to_canonical_bytes(&self) -> SnapkeepResult<Vec<u8>> {
        serde_json::to_vec(&self.0)
            .map_err(|e| SnapkeepError::Codec(format!("Failed to serialize snapshot: {}", e)))
    }

    /// Parse the canonical byte form
    pub fn from_canonical_bytes(bytes: &[u8]) -> SnapkeepResult<Self> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|e| SnapkeepError::Codec(format!("Failed to parse snapshot: {}", e)))
    }

    /// Number of nested maps and sequences on the deepest path
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(&self.0, 0usize)];

        while let Some((value, depth)) = stack.pop() {
            match value {
                Value::Array(items) => {
                    deepest = deepest.max(depth + 1);
                    stack.extend(items.iter().map(|v| (v, depth + 1)));
                }
                Value::Object(map) => {
                    deepest = deepest.max(depth + 1);
                    stack.extend(map.values().map(|v| (v, depth + 1)));
                }
                _ => {}
            }
        }

        deepest
    }
}

impl From<Value> for Snapshot {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Snapshot> for Value {
    fn from(snapshot: Snapshot) -> Self {
        snapshot.0
    }
}

/// Produces the snapshot to back up
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Collect the current application state
    async fn collect(&self) -> SnapkeepResult<Snapshot>;
}

/// Applies a restored snapshot to the application
#[async_trait]
pub trait SnapshotApplier: Send + Sync {
    /// Replace the application state with `snapshot`
    async fn apply(&self, snapshot: Snapshot) -> SnapkeepResult<()>;
}
