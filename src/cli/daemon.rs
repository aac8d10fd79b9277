//! Foreground scheduler
//!
//! Runs the scheduled jobs against a JSON document until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::engine::BackupEngine;
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::scheduler::ScheduledJobs;
use crate::snapshot::JsonFileSnapshot;

/// Run scheduled jobs until interrupted
pub async fn run_daemon(engine: Arc<BackupEngine>, snapshot: PathBuf) -> SnapkeepResult<()> {
    let settings = engine.settings();
    println!("Watching {}", snapshot.display());
    println!(
        "Automatic backups every {}, integrity scan every {}, quota check every {}",
        format_interval(settings.auto_backup_interval_ms),
        format_interval(settings.integrity_scan_interval_ms),
        format_interval(settings.quota_check_interval_ms),
    );
    println!("Press Ctrl-C to stop.");

    let provider = Arc::new(JsonFileSnapshot::new(snapshot));
    let jobs = ScheduledJobs::start(Arc::clone(&engine), provider);
    println!("{} job(s) running.", jobs.job_count());

    let signal = tokio::signal::ctrl_c().await;
    info!("Shutdown requested");
    if engine.is_busy() {
        println!("Waiting for the running backup ({}) to finish...", engine.state());
    }
    jobs.shutdown().await;

    signal.map_err(|e| SnapkeepError::Io(format!("Failed to listen for Ctrl-C: {}", e)))
}

fn format_interval(ms: u64) -> String {
    if ms == 0 {
        return "never".to_string();
    }
    super::backup::format_duration(chrono::Duration::milliseconds(ms.min(i64::MAX as u64) as i64))
}
