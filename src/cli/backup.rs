//! Backup CLI commands
//!
//! Bridges clap argument parsing with the backup engine. Snapshots are read
//! from and restored to JSON documents.

use std::path::PathBuf;

use chrono::Utc;
use clap::Subcommand;

use crate::engine::BackupEngine;
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::models::{BackupId, BackupKind, BackupMetadata};
use crate::retention::Bucket;
use crate::snapshot::{JsonFileSnapshot, SnapshotApplier, SnapshotProvider};

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Back up a JSON document
    Create {
        /// Path to the JSON document to back up
        snapshot: PathBuf,

        /// Free-text description stored with the backup
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List all backups, oldest first
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Restore a backup into a JSON document
    Restore {
        /// Backup id (use 'latest' for most recent)
        backup: String,

        /// Where to write the restored document
        #[arg(short, long)]
        output: PathBuf,

        /// Overwrite the output file if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// Verify the checksum of a backup without decrypting it
    Verify {
        /// Backup id (use 'latest' for most recent)
        backup: String,
    },

    /// Delete a backup
    Delete {
        /// Backup id
        backup: String,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Export a backup to a portable file
    Export {
        /// Backup id (use 'latest' for most recent)
        backup: String,

        /// Destination file
        file: PathBuf,
    },

    /// Import a backup from an export file
    Import {
        /// Export file to import
        file: PathBuf,
    },

    /// Apply the retention policy
    Prune {
        /// Show what would be evicted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Verify every backup and the metadata index
    Check {
        /// Rewrite the index from the record table if they disagree
        #[arg(long)]
        rebuild_index: bool,
    },

    /// Show storage usage against the quota
    Usage,
}

/// Handle a backup command
pub async fn handle_backup_command(engine: &BackupEngine, cmd: BackupCommands) -> SnapkeepResult<()> {
    match cmd {
        BackupCommands::Create {
            snapshot,
            description,
        } => {
            let source = JsonFileSnapshot::new(snapshot);
            let snapshot = source.collect().await?;
            let id = engine
                .create_backup(snapshot, BackupKind::Manual, description)
                .await?;
            let meta = engine.get_metadata(&id).await?;
            println!("Backup created: {}", id);
            println!(
                "Size: {} ({})",
                format_size(meta.size_bytes),
                meta.compression
            );
        }

        BackupCommands::List { verbose } => {
            let backups = engine.list_backups().await?;

            if backups.is_empty() {
                println!("No backups found.");
                println!("Create one with: snapkeep create <snapshot.json>");
                return Ok(());
            }

            println!("Available Backups");
            println!("=================");
            println!();

            let now = Utc::now();
            for (i, backup) in backups.iter().enumerate() {
                let age_str = format_duration(backup.age_at(now));
                if verbose {
                    println!(
                        "{}. {}\n   Created: {}\n   Kind: {}\n   Size: {}\n   Compression: {}\n   Checksum: {}\n   Age: {}{}\n",
                        i + 1,
                        backup.id,
                        backup.created_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
                        backup.kind,
                        format_size(backup.size_bytes),
                        backup.compression,
                        backup.checksum,
                        age_str,
                        backup
                            .description
                            .as_deref()
                            .map(|d| format!("\n   Description: {}", d))
                            .unwrap_or_default(),
                    );
                } else {
                    println!(
                        "  {}. {} ({} ago, {}, {}){}",
                        i + 1,
                        backup.id,
                        age_str,
                        format_size(backup.size_bytes),
                        backup.kind,
                        backup
                            .description
                            .as_deref()
                            .map(|d| format!(" - {}", d))
                            .unwrap_or_default(),
                    );
                }
            }

            println!();
            println!("Total: {} backup(s)", backups.len());
        }

        BackupCommands::Restore {
            backup,
            output,
            force,
        } => {
            let meta = resolve_backup(engine, &backup).await?;

            if output.exists() && !force {
                println!("WARNING: {} already exists!", output.display());
                println!("To overwrite it, run again with --force flag:");
                println!(
                    "  snapkeep restore {} --output {} --force",
                    backup,
                    output.display()
                );
                return Ok(());
            }

            let snapshot = engine.restore_backup(&meta.id).await?;
            JsonFileSnapshot::new(&output).apply(snapshot).await?;
            println!("Restored {} to {}", meta.id, output.display());
        }

        BackupCommands::Verify { backup } => {
            let meta = resolve_backup(engine, &backup).await?;
            let meta = engine.verify_backup(&meta.id).await?;
            println!("Backup {} is intact", meta.id);
            println!("Checksum: {}", meta.checksum);
        }

        BackupCommands::Delete { backup, force } => {
            let meta = resolve_backup(engine, &backup).await?;
            if !force {
                println!(
                    "Backup {} ({}) would be deleted permanently.",
                    meta.id,
                    meta.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                println!("To proceed, run again with --force flag:");
                println!("  snapkeep delete {} --force", meta.id);
                return Ok(());
            }
            engine.delete_backup(&meta.id).await?;
            println!("Deleted backup {}", meta.id);
        }

        BackupCommands::Export { backup, file } => {
            let meta = resolve_backup(engine, &backup).await?;
            engine.export_to_file(&meta.id, &file).await?;
            println!("Exported {} to {}", meta.id, file.display());
        }

        BackupCommands::Import { file } => {
            let id = engine.import_from_file(&file).await?;
            println!("Imported backup {}", id);
        }

        BackupCommands::Prune { dry_run } => {
            let policy = engine.settings().retention;
            println!(
                "Retention policy: {} daily, {} weekly, {} monthly, {} yearly",
                policy.daily, policy.weekly, policy.monthly, policy.yearly
            );

            if dry_run {
                let planned = engine.plan_retention(Utc::now()).await?;
                if planned.is_empty() {
                    println!("No backups to prune.");
                    return Ok(());
                }
                println!("Would evict {} backup(s):", planned.len());
                for eviction in planned {
                    println!("  {} [{}]", eviction.id, eviction.bucket);
                }
                return Ok(());
            }

            let report = engine.run_retention().await?;
            if report.is_empty() {
                println!("No backups to prune.");
            } else {
                for (bucket, id) in &report.evicted {
                    println!("  Evicted {} [{}]", id, bucket);
                }
                let per_bucket: Vec<String> = Bucket::ALL
                    .iter()
                    .map(|&bucket| (bucket, report.evicted_from(bucket)))
                    .filter(|(_, n)| *n > 0)
                    .map(|(bucket, n)| format!("{} {}", n, bucket))
                    .collect();
                println!(
                    "Deleted {} backup(s) ({}).",
                    report.evicted.len(),
                    per_bucket.join(", ")
                );
            }
        }

        BackupCommands::Check { rebuild_index } => {
            let integrity = engine.scan_integrity().await?;
            let index = engine.reconcile_index().await?;

            println!("Integrity Check");
            println!("===============");
            println!("Checked: {}", integrity.checked);
            for id in &integrity.corrupted {
                println!("  CORRUPTED: {}", id);
            }
            for id in &integrity.missing {
                println!("  MISSING RECORD: {}", id);
            }
            for id in &index.missing_index {
                println!("  UNINDEXED: {}", id);
            }

            if integrity.is_clean() && index.is_consistent() {
                println!("Status: OK");
            } else {
                println!("Status: PROBLEMS FOUND");
                if rebuild_index && !index.is_consistent() {
                    let count = engine.rebuild_index().await?;
                    println!("Index rebuilt with {} entries.", count);
                }
            }
        }

        BackupCommands::Usage => {
            let usage = engine.usage().await?;
            println!(
                "Used: {} of {} ({:.1}%)",
                format_size(usage.used_bytes),
                format_size(usage.quota_bytes),
                usage.percent_used()
            );
            println!(
                "Retention runs early at {}% of the quota.",
                engine.settings().quota_threshold_percent
            );
        }
    }

    Ok(())
}

/// Resolve a backup argument ('latest' or an id) to its metadata
async fn resolve_backup(engine: &BackupEngine, backup: &str) -> SnapkeepResult<BackupMetadata> {
    if backup.eq_ignore_ascii_case("latest") {
        return engine
            .latest_backup()
            .await?
            .ok_or_else(|| SnapkeepError::backup_not_found("latest"));
    }

    let id = BackupId::parse(backup)?;
    engine.get_metadata(&id).await
}

/// Format a duration in human-readable form
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds();

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    format!("{}mo", days / 30)
}

/// Format a byte count in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
