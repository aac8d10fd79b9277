use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use snapkeep::cli::{handle_backup_command, run_daemon, BackupCommands};
use snapkeep::config::{SnapkeepPaths, Settings};
use snapkeep::diagnostics::DiagnosticsLog;
use snapkeep::engine::BackupEngine;
use snapkeep::storage::FileBackend;

/// Environment variable holding the tracing filter
const LOG_ENV: &str = "SNAPKEEP_LOG";

#[derive(Parser)]
#[command(
    name = "snapkeep",
    author = "Kaylee Beyene",
    version,
    about = "Local encrypted backup and retention engine",
    long_about = "snapkeep takes point-in-time snapshots of a JSON document, \
                  compresses and encrypts them, and keeps a bounded history \
                  under a daily/weekly/monthly/yearly retention policy."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Backup(BackupCommands),

    /// Run scheduled backups, integrity scans and quota checks
    Daemon {
        /// JSON document to back up automatically
        snapshot: PathBuf,
    },

    /// Show recent diagnostic events
    Log {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Write the current settings to config.json
    Init,

    /// Show current configuration and paths
    Config,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Initialize paths and settings
    let paths = SnapkeepPaths::new()?;
    let settings = Settings::load_or_create(&paths).await?;
    paths.ensure_directories().await?;

    let Some(command) = cli.command else {
        println!("snapkeep - Local encrypted backup and retention");
        println!();
        println!("Run 'snapkeep --help' for usage information.");
        return Ok(());
    };

    let diagnostics = Arc::new(DiagnosticsLog::new(paths.diagnostics_log()));

    match command {
        Commands::Init => {
            settings.save(&paths).await?;
            println!("Settings written to {}", paths.settings_file().display());
            println!("Edit that file to change retention, quota and schedules.");
        }
        Commands::Config => {
            println!("snapkeep Configuration");
            println!("======================");
            println!("Data directory:   {}", paths.base_dir().display());
            println!("Settings file:    {}", paths.settings_file().display());
            println!("Store directory:  {}", paths.store_dir().display());
            println!("Diagnostics log:  {}", paths.diagnostics_log().display());
            println!();
            println!("Settings:");
            println!(
                "  Retention: {} daily, {} weekly, {} monthly, {} yearly",
                settings.retention.daily,
                settings.retention.weekly,
                settings.retention.monthly,
                settings.retention.yearly
            );
            println!("  Max backup size:   {} bytes", settings.max_backup_size_bytes);
            println!("  Storage quota:     {} bytes", settings.storage_quota_bytes);
            println!("  Quota threshold:   {}%", settings.quota_threshold_percent);
            println!(
                "  Compression:       {} ({:?}, level {})",
                if settings.compression_enabled { "enabled" } else { "disabled" },
                settings.compression_algorithm,
                settings.zstd_level
            );
            println!("  Auto backup every: {} ms", settings.auto_backup_interval_ms);
        }
        Commands::Log { limit } => {
            let entries = diagnostics.read_recent(limit).await?;
            if entries.is_empty() {
                println!("No diagnostic events recorded.");
            }
            for entry in entries {
                println!("{}", entry.format_human_readable());
            }
        }
        Commands::Daemon { snapshot } => {
            let engine = Arc::new(BackupEngine::open(
                settings,
                Arc::new(FileBackend::new(paths.store_dir())),
                diagnostics,
            )?);
            run_daemon(engine, snapshot).await?;
        }
        Commands::Backup(cmd) => {
            let engine = BackupEngine::open(
                settings,
                Arc::new(FileBackend::new(paths.store_dir())),
                diagnostics,
            )?;
            handle_backup_command(&engine, cmd).await?;
        }
    }

    Ok(())
}
