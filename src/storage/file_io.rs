//! File I/O utilities with atomic writes
//!
//! Provides safe file operations that won't corrupt data on failure.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::SnapkeepError;

/// Read JSON from a file, returning a default value if file doesn't exist
pub async fn read_json<T, P>(path: P) -> Result<T, SnapkeepError>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let Some(bytes) = read_bytes_optional(path).await? else {
        return Ok(T::default());
    };

    serde_json::from_slice(&bytes).map_err(|e| {
        SnapkeepError::StorageFailure(format!("Failed to parse {}: {}", path.display(), e))
    })
}

/// Write JSON to a file atomically (write to temp, then rename)
///
/// The file is either completely written or not modified at all.
pub async fn write_json_atomic<T, P>(path: P, data: &T) -> Result<(), SnapkeepError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let json = serde_json::to_vec_pretty(data)
        .map_err(|e| SnapkeepError::StorageFailure(format!("Failed to serialize data: {}", e)))?;
    write_bytes_atomic(path, &json).await
}

/// Write raw bytes to a file atomically, without blocking the runtime
pub async fn write_bytes_atomic<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<(), SnapkeepError> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            SnapkeepError::StorageFailure(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = temp_path_for(path);

    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .map_err(|e| SnapkeepError::StorageFailure(format!("Failed to create temp file: {}", e)))?;

    file.write_all(data)
        .await
        .map_err(|e| SnapkeepError::StorageFailure(format!("Failed to write data: {}", e)))?;

    file.sync_all()
        .await
        .map_err(|e| SnapkeepError::StorageFailure(format!("Failed to sync data: {}", e)))?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(SnapkeepError::StorageFailure(format!(
            "Failed to rename temp file: {}",
            e
        )));
    }

    Ok(())
}

/// Read a file, returning `None` if it doesn't exist
pub async fn read_bytes_optional<P: AsRef<Path>>(path: P) -> Result<Option<Vec<u8>>, SnapkeepError> {
    let path = path.as_ref();
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SnapkeepError::StorageFailure(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Temp file next to `path`, e.g. `record.json` -> `record.json.tmp`
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
