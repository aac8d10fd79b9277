//! Backup creation lifecycle

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{SnapkeepError, SnapkeepResult};

/// Stage of the most recent backup creation
///
/// `Completed` and `Failed` describe the last finished creation; the next
/// creation moves on from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupState {
    #[default]
    Idle,
    Collecting,
    Encoding,
    Sealing,
    Storing,
    Completed,
    Failed,
}

impl std::fmt::Display for BackupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BackupState::Idle => "idle",
            BackupState::Collecting => "collecting",
            BackupState::Encoding => "encoding",
            BackupState::Sealing => "sealing",
            BackupState::Storing => "storing",
            BackupState::Completed => "completed",
            BackupState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Holds the single writer slot; releases it on drop
pub(crate) struct CreationGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CreationGuard<'a> {
    /// Take the slot, or fail with `BackupInProgress` if it is taken
    pub(crate) fn acquire(flag: &'a AtomicBool) -> SnapkeepResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SnapkeepError::BackupInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = CreationGuard::acquire(&flag).unwrap();
        assert!(matches!(
            CreationGuard::acquire(&flag),
            Err(SnapkeepError::BackupInProgress)
        ));
        drop(guard);
        assert!(CreationGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn test_guard_released_on_early_return() {
        fn failing(flag: &AtomicBool) -> SnapkeepResult<()> {
            let _guard = CreationGuard::acquire(flag)?;
            Err(SnapkeepError::Codec("boom".into()))
        }

        let flag = AtomicBool::new(false);
        assert!(failing(&flag).is_err());
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BackupState::Idle.to_string(), "idle");
        assert_eq!(BackupState::Storing.to_string(), "storing");
    }
}
