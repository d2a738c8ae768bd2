//! Backup runs
//!
//! `BackupOrchestrator::run` produces one artifact per requested kind. All
//! kinds in a run share one timestamp. A failure in one kind is recorded in
//! the report and never stops the others.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Timelike, Utc};
use clap::ValueEnum;
use serde::Serialize;

use crate::archive::FileTreeArchiver;
use crate::config::{KeepsakePaths, Settings};
use crate::database::{select_dump_strategy, DatabaseArchiver, DumpStrategy};
use crate::error::{KeepsakeError, KeepsakeResult};
use crate::logging::OpLog;

use super::artifact::{artifact_filename, ArtifactFormat, ArtifactKind};

/// What a run should back up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    #[default]
    All,
    Database,
    Storage,
    Config,
}

impl BackupKind {
    /// Artifact kinds covered, in run order
    pub fn artifact_kinds(&self) -> Vec<ArtifactKind> {
        match self {
            BackupKind::All => vec![
                ArtifactKind::Database,
                ArtifactKind::Storage,
                ArtifactKind::Config,
            ],
            BackupKind::Database => vec![ArtifactKind::Database],
            BackupKind::Storage => vec![ArtifactKind::Storage],
            BackupKind::Config => vec![ArtifactKind::Config],
        }
    }

    /// The run kind that produces artifacts of `kind`
    pub fn for_artifact(kind: ArtifactKind) -> Option<Self> {
        match kind {
            ArtifactKind::Database => Some(BackupKind::Database),
            ArtifactKind::Storage => Some(BackupKind::Storage),
            ArtifactKind::Config => Some(BackupKind::Config),
            ArtifactKind::Unknown => None,
        }
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupKind::All => write!(f, "all"),
            BackupKind::Database => write!(f, "database"),
            BackupKind::Storage => write!(f, "storage"),
            BackupKind::Config => write!(f, "config"),
        }
    }
}

/// Outcome for one artifact kind
#[derive(Debug, Clone, Serialize)]
pub struct KindResult {
    pub success: bool,
    pub message: String,
    /// Written artifact (absent on failure and on dry runs)
    pub artifact: Option<PathBuf>,
    /// Tables for a database dump, files for an archive
    pub items: usize,
}

impl KindResult {
    fn failed(error: &KeepsakeError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            artifact: None,
            items: 0,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub kind: BackupKind,
    pub dry_run: bool,
    pub timestamp: DateTime<Utc>,
    pub results: BTreeMap<ArtifactKind, KindResult>,
}

impl RunReport {
    /// True when every requested kind succeeded
    pub fn success(&self) -> bool {
        self.results.values().all(|r| r.success)
    }

    pub fn failed_kinds(&self) -> Vec<ArtifactKind> {
        self.results
            .iter()
            .filter(|(_, r)| !r.success)
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn summary(&self) -> String {
        let succeeded = self.results.values().filter(|r| r.success).count();
        format!(
            "{} of {} backup kinds succeeded{}",
            succeeded,
            self.results.len(),
            if self.dry_run { " (dry run)" } else { "" }
        )
    }
}

/// Runs backups of the configured database, storage tree and config files
pub struct BackupOrchestrator {
    backup_dir: PathBuf,
    storage_dir: PathBuf,
    project_root: PathBuf,
    config_files: Vec<PathBuf>,
    database: DatabaseArchiver,
}

impl BackupOrchestrator {
    pub fn new(paths: &KeepsakePaths, settings: &Settings, strategy: Box<dyn DumpStrategy>) -> Self {
        Self {
            backup_dir: settings.backup_dir(paths),
            storage_dir: settings.storage_dir(paths),
            project_root: settings.project_root(paths),
            config_files: settings.config_files.clone(),
            database: DatabaseArchiver::new(
                settings.database_path(paths),
                settings.database.compress,
                strategy,
            ),
        }
    }

    /// Build with the dump strategy probed from `settings`
    pub fn from_settings(paths: &KeepsakePaths, settings: &Settings) -> Self {
        Self::new(paths, settings, select_dump_strategy(&settings.database))
    }

    pub fn backup_dir(&self) -> &PathBuf {
        &self.backup_dir
    }

    /// Run a backup of `kind`. With `dry_run` nothing is written and each
    /// kind reports how many items it would cover.
    pub fn run(&self, kind: BackupKind, dry_run: bool) -> RunReport {
        let timestamp = self.free_timestamp(kind, Utc::now());
        let mut report = RunReport {
            kind,
            dry_run,
            timestamp,
            results: BTreeMap::new(),
        };

        tracing::info!(kind = %kind, dry_run, "backup run started");

        if !dry_run {
            if let Err(e) = fs::create_dir_all(&self.backup_dir) {
                let error = KeepsakeError::Config(format!(
                    "Cannot create backup directory {}: {}",
                    self.backup_dir.display(),
                    e
                ));
                for artifact_kind in kind.artifact_kinds() {
                    report.results.insert(artifact_kind, KindResult::failed(&error));
                }
                tracing::error!(error = %error, "backup run aborted");
                return report;
            }
        }

        for artifact_kind in kind.artifact_kinds() {
            let mut log = OpLog::new("backup");
            let result = if dry_run {
                self.preview_kind(artifact_kind, &mut log)
            } else {
                self.backup_kind(artifact_kind, timestamp, &mut log)
            };

            let result = result.unwrap_or_else(|e| {
                log.error(&artifact_kind.to_string(), e.to_string());
                KindResult::failed(&e)
            });
            report.results.insert(artifact_kind, result);
        }

        tracing::info!(success = report.success(), "{}", report.summary());
        report
    }

    fn preview_kind(&self, kind: ArtifactKind, log: &mut OpLog) -> KeepsakeResult<KindResult> {
        let items = match kind {
            ArtifactKind::Database => self.database.count_tables()?,
            ArtifactKind::Storage => self.storage_archiver().count(log)?,
            ArtifactKind::Config => self.config_archiver().count(log)?,
            ArtifactKind::Unknown => 0,
        };
        Ok(KindResult {
            success: true,
            message: format!("would back up {} items", items),
            artifact: None,
            items,
        })
    }

    fn backup_kind(
        &self,
        kind: ArtifactKind,
        timestamp: DateTime<Utc>,
        log: &mut OpLog,
    ) -> KeepsakeResult<KindResult> {
        match kind {
            ArtifactKind::Database => {
                let summary = self.database.archive(&self.backup_dir, timestamp, log)?;
                let items = summary.tables.unwrap_or(0);
                Ok(KindResult {
                    success: true,
                    message: format!(
                        "database dumped via {} ({} bytes)",
                        summary.strategy, summary.size
                    ),
                    artifact: Some(summary.path),
                    items,
                })
            }
            ArtifactKind::Storage => {
                let output = self.archive_path(kind, timestamp);
                log.set_path(&output);
                let items = self.storage_archiver().write(&output, log)?;
                Ok(KindResult {
                    success: true,
                    message: format!("archived {} storage files", items),
                    artifact: Some(output),
                    items,
                })
            }
            ArtifactKind::Config => {
                let archiver = self.config_archiver();
                if archiver.count(log)? == 0 {
                    return Err(KeepsakeError::Config(format!(
                        "None of the configured config files exist under {}",
                        self.project_root.display()
                    )));
                }
                let output = self.archive_path(kind, timestamp);
                log.set_path(&output);
                let items = archiver.write(&output, log)?;
                Ok(KindResult {
                    success: true,
                    message: format!("archived {} config files", items),
                    artifact: Some(output),
                    items,
                })
            }
            ArtifactKind::Unknown => Err(KeepsakeError::UnsupportedArtifact(
                "cannot back up an unknown kind".into(),
            )),
        }
    }

    /// First second at or after `start` whose artifact filenames are all
    /// unused, so a run never overwrites an earlier artifact
    fn free_timestamp(&self, kind: BackupKind, start: DateTime<Utc>) -> DateTime<Utc> {
        let mut timestamp = start.with_nanosecond(0).unwrap_or(start);
        while kind
            .artifact_kinds()
            .into_iter()
            .any(|k| self.artifact_path(k, timestamp).exists())
        {
            timestamp += Duration::seconds(1);
        }
        timestamp
    }

    fn artifact_path(&self, kind: ArtifactKind, timestamp: DateTime<Utc>) -> PathBuf {
        match kind {
            ArtifactKind::Database => self
                .backup_dir
                .join(self.database.artifact_filename(timestamp)),
            _ => self.archive_path(kind, timestamp),
        }
    }

    fn archive_path(&self, kind: ArtifactKind, timestamp: DateTime<Utc>) -> PathBuf {
        self.backup_dir
            .join(artifact_filename(kind, timestamp, ArtifactFormat::TarGz))
    }

    /// Storage entries are wrapped in the storage folder's own name
    fn storage_archiver(&self) -> FileTreeArchiver {
        let archiver = FileTreeArchiver::directory(&self.storage_dir);
        match self.storage_dir.file_name() {
            Some(name) => archiver.under(name),
            None => archiver,
        }
    }

    fn config_archiver(&self) -> FileTreeArchiver {
        FileTreeArchiver::files(&self.project_root, self.config_files.clone())
    }
}
