//! Scheduled jobs
//!
//! Three independent interval-driven tasks run against a shared engine:
//!
//! - automatic backup, checked every `scheduler_tick_ms`
//! - integrity scan, every `integrity_scan_interval_ms`
//! - quota monitor, every `quota_check_interval_ms`
//!
//! A task awaits its run before taking the next tick, so no job overlaps
//! itself; missed ticks are skipped. Job errors are logged and the job keeps
//! its schedule.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::engine::BackupEngine;
use crate::error::SnapkeepError;
use crate::snapshot::SnapshotProvider;

/// Handles of the running jobs
pub struct ScheduledJobs {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl ScheduledJobs {
    /// Spawn every enabled job on the current runtime
    pub fn start(engine: Arc<BackupEngine>, provider: Arc<dyn SnapshotProvider>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = engine.settings().clone();
        let mut handles = Vec::new();

        if settings.auto_backup_interval_ms > 0 {
            let engine = Arc::clone(&engine);
            handles.push((
                "auto-backup",
                spawn_job(
                    "auto-backup",
                    Duration::from_millis(settings.scheduler_tick_ms),
                    shutdown_rx.clone(),
                    move || {
                        let engine = Arc::clone(&engine);
                        let provider = Arc::clone(&provider);
                        async move { run_auto_backup(&engine, provider.as_ref()).await }
                    },
                ),
            ));
        }

        if settings.integrity_scan_interval_ms > 0 {
            let engine = Arc::clone(&engine);
            handles.push((
                "integrity-scan",
                spawn_job(
                    "integrity-scan",
                    Duration::from_millis(settings.integrity_scan_interval_ms),
                    shutdown_rx.clone(),
                    move || {
                        let engine = Arc::clone(&engine);
                        async move { run_integrity_scan(&engine).await }
                    },
                ),
            ));
        }

        if settings.quota_check_interval_ms > 0 {
            let engine = Arc::clone(&engine);
            handles.push((
                "quota-monitor",
                spawn_job(
                    "quota-monitor",
                    Duration::from_millis(settings.quota_check_interval_ms),
                    shutdown_rx,
                    move || {
                        let engine = Arc::clone(&engine);
                        async move { run_quota_check(&engine).await }
                    },
                ),
            ));
        }

        info!(jobs = handles.len(), "Scheduled jobs started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Number of running jobs
    pub fn job_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop all jobs, waiting for any run in progress to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                error!(job = name, error = %e, "Scheduled job panicked");
            }
        }
        info!("Scheduled jobs stopped");
    }
}

fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; runs start one period in.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!(job = name, "Running scheduled job");
                    job().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(job = name, "Scheduled job stopped");
    })
}

async fn run_auto_backup(engine: &BackupEngine, provider: &dyn SnapshotProvider) {
    match engine.maybe_auto_backup(provider).await {
        Ok(Some(id)) => info!(id = %id, "Automatic backup created"),
        Ok(None) => debug!("No automatic backup due"),
        Err(SnapkeepError::BackupInProgress) => {
            debug!("Automatic backup skipped, another backup is in progress")
        }
        Err(e) => error!(error = %e, "Automatic backup failed"),
    }
}

async fn run_integrity_scan(engine: &BackupEngine) {
    match engine.scan_integrity().await {
        Ok(report) if report.is_clean() => debug!(checked = report.checked, "Integrity scan clean"),
        Ok(report) => warn!(
            checked = report.checked,
            corrupted = report.corrupted.len(),
            missing = report.missing.len(),
            "Integrity scan found problems"
        ),
        Err(e) => error!(error = %e, "Integrity scan failed"),
    }
}

async fn run_quota_check(engine: &BackupEngine) {
    match engine.check_quota().await {
        Ok(Some(report)) => info!(evicted = report.evicted.len(), "Quota retention pass finished"),
        Ok(None) => {}
        Err(e) => error!(error = %e, "Quota check failed"),
    }
}
