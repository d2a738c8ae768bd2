//! Backup CLI commands
//!
//! Implements CLI commands for backup management.

use std::fs;
use std::path::PathBuf;

use clap::Subcommand;

use crate::audit::{AuditEntry, AuditLog};
use crate::backup::{
    BackupArtifact, BackupCatalog, BackupKind, BackupOrchestrator, RestoreCoordinator,
};
use crate::config::paths::KeepsakePaths;
use crate::config::settings::Settings;
use crate::database::Database;
use crate::display::{
    format_artifact_details, format_backup_page, format_restore_report, format_run_report,
    format_statistics,
};
use crate::error::{KeepsakeError, KeepsakeResult};

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Run a backup
    Run {
        /// What to back up
        #[arg(short, long, value_enum, default_value_t = BackupKind::All)]
        kind: BackupKind,

        /// Report what would be backed up without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List available backups, newest first
    List {
        /// Page number (1-based)
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Backups per page
        #[arg(long, default_value = "20")]
        per_page: usize,

        /// Show full ids and timestamps
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show backup statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show information about a specific backup
    Info {
        /// Backup id, filename, or 'latest'
        backup: String,
    },

    /// Copy a backup out of the backup directory
    Download {
        /// Backup id, filename, or 'latest'
        backup: String,

        /// Directory to write the file into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Delete a backup
    Delete {
        /// Backup id, filename, or 'latest'
        backup: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Restore from a backup
    Restore {
        /// Backup id, filename, or 'latest'
        backup: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,

        /// Print the full restore transcript
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show recent administrative actions from the audit trail
    History {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// Handle a backup command
pub fn handle_backup_command(
    paths: &KeepsakePaths,
    settings: &Settings,
    cmd: BackupCommands,
) -> KeepsakeResult<()> {
    let catalog = BackupCatalog::new(settings.backup_dir(paths));

    match cmd {
        BackupCommands::Run { kind, dry_run } => {
            if dry_run {
                println!("Dry run: nothing will be written.");
            } else {
                println!("Running {} backup...", kind);
            }

            let report = BackupOrchestrator::from_settings(paths, settings).run(kind, dry_run);
            println!("{}", format_run_report(&report));

            if !dry_run {
                record_audit(paths, settings, &AuditEntry::backup_run(kind.to_string(), report.summary()));
            }

            if !report.success() {
                let failed: Vec<String> = report.failed_kinds().iter().map(|k| k.to_string()).collect();
                return Err(KeepsakeError::Backup(format!(
                    "{} ({})",
                    report.summary(),
                    failed.join(", ")
                )));
            }
        }

        BackupCommands::List {
            page,
            per_page,
            verbose,
        } => {
            let page = catalog.list(page, per_page);
            println!("{}", format_backup_page(&page, verbose, chrono::Utc::now()));
            if page.total == 0 {
                println!("Create one with: keepsake run");
            }
        }

        BackupCommands::Stats { json } => {
            let stats = catalog.statistics();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", format_statistics(&stats));
            }
        }

        BackupCommands::Info { backup } => {
            let artifact = resolve_artifact(&catalog, &backup)?;
            print!("{}", format_artifact_details(&artifact));

            let coordinator = RestoreCoordinator::new(paths, settings);
            match coordinator.target_for(artifact.kind) {
                Some(target) => println!("  Restores: {}", target.display()),
                None => println!("  Restores: not restorable (unknown prefix)"),
            }
        }

        BackupCommands::Download { backup, output } => {
            let artifact = resolve_artifact(&catalog, &backup)?;
            let download = catalog.download(&artifact.id)?;

            fs::create_dir_all(&output).map_err(|e| {
                KeepsakeError::Io(format!("Failed to create {}: {}", output.display(), e))
            })?;
            let destination = output.join(&download.filename);
            fs::write(&destination, &download.bytes).map_err(|e| {
                KeepsakeError::Io(format!("Failed to write {}: {}", destination.display(), e))
            })?;

            println!(
                "Downloaded {} ({}, {} bytes)",
                destination.display(),
                download.content_type,
                download.bytes.len()
            );
        }

        BackupCommands::Delete { backup, force } => {
            let artifact = resolve_artifact(&catalog, &backup)?;

            if !force {
                print!("{}", format_artifact_details(&artifact));
                println!();
                println!("To delete this backup, run again with --force flag:");
                println!("  keepsake delete {} --force", backup);
                return Ok(());
            }

            let deleted = catalog.delete(&artifact.id)?;
            println!("Deleted {}", deleted.filename);
            record_audit(paths, settings, &AuditEntry::backup_deleted(&deleted.filename));
        }

        BackupCommands::Restore {
            backup,
            force,
            verbose,
        } => {
            let artifact = resolve_artifact(&catalog, &backup)?;
            let coordinator = RestoreCoordinator::new(paths, settings);
            let Some(target) = coordinator.target_for(artifact.kind) else {
                return Err(KeepsakeError::UnsupportedArtifact(format!(
                    "{} does not match a known backup prefix",
                    artifact.filename
                )));
            };

            print!("{}", format_artifact_details(&artifact));
            println!("  Restores: {}", target.display());
            println!();

            if !force {
                println!("WARNING: This will overwrite current data in {}!", target.display());
                println!("To proceed, run again with --force flag:");
                println!("  keepsake restore {} --force", backup);
                return Ok(());
            }

            if settings.safety_backup_before_restore {
                if let Some(kind) = BackupKind::for_artifact(artifact.kind) {
                    println!("Creating {} backup of current data before restore...", kind);
                    let safety = BackupOrchestrator::from_settings(paths, settings).run(kind, false);
                    if !safety.success() {
                        println!("{}", format_run_report(&safety));
                        return Err(KeepsakeError::Restore(
                            "safety backup failed, restore aborted".into(),
                        ));
                    }
                    for path in safety.results.values().filter_map(|r| r.artifact.as_ref()) {
                        println!("Pre-restore backup saved: {}", path.display());
                    }
                    println!();
                }
            }

            println!("Restoring from backup...");
            let report = coordinator.restore(&artifact.id)?;
            print!("{}", format_restore_report(&report, verbose));

            record_audit(
                paths,
                settings,
                &AuditEntry::restore(&artifact.filename, report.success, &report.summary),
            );

            if !report.success {
                return Err(KeepsakeError::Restore(report.summary));
            }
        }

        BackupCommands::History { limit } => {
            let db_path = settings.database_path(paths);
            if !db_path.is_file() {
                println!("No database at {}.", db_path.display());
                return Ok(());
            }

            let db = Database::open(&db_path, settings.database.foreign_keys)?;
            let entries = AuditLog::new(&db, &settings.audit).read_recent(limit)?;
            if entries.is_empty() {
                println!("No audit entries found.");
            }
            for entry in entries {
                println!("{}", entry.format_human_readable());
            }
        }
    }

    Ok(())
}

/// Resolve a backup identifier: 'latest', a full id, or a filename
fn resolve_artifact(catalog: &BackupCatalog, backup: &str) -> KeepsakeResult<BackupArtifact> {
    if backup.eq_ignore_ascii_case("latest") {
        return catalog
            .get_latest(None)
            .ok_or_else(|| KeepsakeError::backup_not_found("latest"));
    }

    match catalog.get(backup) {
        Err(e) if e.is_not_found() => catalog.get_by_filename(backup),
        other => other,
    }
}

/// Append an audit entry to the live database. Failures are logged, never
/// surfaced: the action itself already happened.
fn record_audit(paths: &KeepsakePaths, settings: &Settings, entry: &AuditEntry) {
    let db_path = settings.database_path(paths);
    if !db_path.is_file() {
        tracing::debug!(path = %db_path.display(), "no database, audit entry not recorded");
        return;
    }

    let result = Database::open(&db_path, settings.database.foreign_keys)
        .and_then(|db| AuditLog::new(&db, &settings.audit).record(entry));
    if let Err(e) = result {
        tracing::warn!(error = %e, action = %entry.action, "failed to record audit entry");
    }
}
