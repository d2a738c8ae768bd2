//! Backup restoration
//!
//! `RestoreCoordinator::restore` looks an artifact up in the catalog and
//! dispatches on its filename prefix:
//!
//! - database: decompress, capture the audit table, disable integrity
//!   checks, replay, put the audit table back, re-enable integrity checks
//! - storage and config: extract into a temporary directory and merge into
//!   the live tree
//!
//! Restores are serialized through an exclusive lock on
//! `<base>/restore.lock`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;

use crate::archive::{FileTreeExtractor, MergeReport};
use crate::audit::{AuditLog, AuditRestore};
use crate::config::settings::AuditSettings;
use crate::config::{KeepsakePaths, Settings};
use crate::database::{Database, DatabaseRestorer, ReplayPolicy, ReplayReport, ScriptSource};
use crate::error::{KeepsakeError, KeepsakeResult};
use crate::logging::OpLog;

use super::artifact::{ArtifactKind, BackupArtifact};
use super::catalog::BackupCatalog;

/// Exclusive advisory lock held for the duration of a restore
pub struct RestoreLock {
    file: File,
    path: PathBuf,
}

impl RestoreLock {
    fn open(path: &Path) -> KeepsakeResult<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| KeepsakeError::Restore(format!("open lock file: {}", e)))
    }

    /// Acquire the lock, blocking until it is free
    pub fn acquire(path: &Path) -> KeepsakeResult<Self> {
        let file = Self::open(path)?;
        file.lock_exclusive()
            .map_err(|e| KeepsakeError::Restore(format!("acquire restore lock: {}", e)))?;
        tracing::debug!(path = %path.display(), "acquired restore lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Acquire the lock if nobody holds it
    pub fn try_acquire(path: &Path) -> KeepsakeResult<Option<Self>> {
        let file = Self::open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => {
                return Err(KeepsakeError::Restore(format!(
                    "try acquire restore lock: {}",
                    e
                )))
            }
        }
        tracing::debug!(path = %path.display(), "acquired restore lock");
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }
}

impl Drop for RestoreLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::debug!(path = %self.path.display(), "failed to release restore lock: {}", e);
        }
    }
}

/// What a restore did
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RestoreOutcome {
    Database {
        replay: ReplayReport,
        /// Absent when the audit table did not exist before the restore
        audit: Option<AuditRestore>,
    },
    Files {
        target: PathBuf,
        merge: MergeReport,
    },
}

impl RestoreOutcome {
    pub fn is_clean(&self) -> bool {
        match self {
            RestoreOutcome::Database { replay, audit } => {
                replay.is_clean() && audit.map_or(true, |a| a.failed == 0)
            }
            RestoreOutcome::Files { merge, .. } => merge.failed == 0,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            RestoreOutcome::Database { replay, audit } => {
                let audit = match audit {
                    Some(a) => format!("{} audit rows preserved", a.restored),
                    None => "no audit table".to_string(),
                };
                format!("{}; {}", replay.summary(), audit)
            }
            RestoreOutcome::Files { target, merge } => format!(
                "{} files restored into {}, {} failed",
                merge.copied,
                target.display(),
                merge.failed
            ),
        }
    }
}

/// Result of one restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub artifact: BackupArtifact,
    pub success: bool,
    pub summary: String,
    /// Every logged step, in order
    pub transcript: Vec<String>,
    /// Absent when the restore stopped before producing a result
    pub outcome: Option<RestoreOutcome>,
}

/// Restores artifacts from the backup directory into the live deployment
pub struct RestoreCoordinator {
    catalog: BackupCatalog,
    lock_file: PathBuf,
    database_path: PathBuf,
    foreign_keys: bool,
    storage_dir: PathBuf,
    project_root: PathBuf,
    audit: AuditSettings,
    policy: ReplayPolicy,
}

impl RestoreCoordinator {
    pub fn new(paths: &KeepsakePaths, settings: &Settings) -> Self {
        Self {
            catalog: BackupCatalog::new(settings.backup_dir(paths)),
            lock_file: paths.restore_lock_file(),
            database_path: settings.database_path(paths),
            foreign_keys: settings.database.foreign_keys,
            storage_dir: settings.storage_dir(paths),
            project_root: settings.project_root(paths),
            audit: settings.audit.clone(),
            policy: ReplayPolicy::from_settings(&settings.replay),
        }
    }

    /// Where an artifact of `kind` is restored to
    pub fn target_for(&self, kind: ArtifactKind) -> Option<&Path> {
        match kind {
            ArtifactKind::Database => Some(self.database_path.as_path()),
            ArtifactKind::Storage => Some(self.storage_dir.as_path()),
            ArtifactKind::Config => Some(self.project_root.as_path()),
            ArtifactKind::Unknown => None,
        }
    }

    /// Restore the artifact with `id`.
    ///
    /// Unknown ids and unrecognized artifact types are errors. A restore
    /// that starts and then fails returns a report with `success == false`
    /// and the transcript of what happened.
    pub fn restore(&self, id: &str) -> KeepsakeResult<RestoreReport> {
        let artifact = self.catalog.get(id)?;
        if artifact.kind == ArtifactKind::Unknown {
            return Err(KeepsakeError::UnsupportedArtifact(format!(
                "{} does not match a known backup prefix",
                artifact.filename
            )));
        }

        let mut log = OpLog::new("restore")
            .with_artifact(&artifact.id)
            .with_path(&artifact.path);

        let _lock = match RestoreLock::try_acquire(&self.lock_file)? {
            Some(lock) => lock,
            None => {
                log.info("lock", "another restore is running, waiting");
                RestoreLock::acquire(&self.lock_file)?
            }
        };
        log.info("start", format!("restoring {} ({})", artifact.filename, artifact.kind));

        let result = match artifact.kind {
            ArtifactKind::Database => self.restore_database(&artifact, &mut log),
            _ => self.restore_files(&artifact, &mut log),
        };

        let report = match result {
            Ok(outcome) => {
                let summary = outcome.summary();
                let success = outcome.is_clean();
                if success {
                    log.info("done", &summary);
                } else {
                    log.warn("done", format!("completed with failures: {}", summary));
                }
                RestoreReport {
                    artifact,
                    success,
                    summary,
                    transcript: Vec::new(),
                    outcome: Some(outcome),
                }
            }
            Err(e) => {
                let summary = format!("restore failed: {}", e);
                log.error("failed", &summary);
                RestoreReport {
                    artifact,
                    success: false,
                    summary,
                    transcript: Vec::new(),
                    outcome: None,
                }
            }
        };

        Ok(RestoreReport {
            transcript: log.into_transcript(),
            ..report
        })
    }

    fn restore_database(
        &self,
        artifact: &BackupArtifact,
        log: &mut OpLog,
    ) -> KeepsakeResult<RestoreOutcome> {
        let source = ScriptSource::open(&artifact.path, artifact.format, log)?;
        let result = self.replay_into_live(&source, log);
        source.cleanup(log);
        result
    }

    fn replay_into_live(&self, source: &ScriptSource, log: &mut OpLog) -> KeepsakeResult<RestoreOutcome> {
        let script = source.read_to_string()?;
        let db = Database::open(&self.database_path, self.foreign_keys)?;
        self.replay_script(&db, &script, log)
    }

    /// Replay `script` into `db` around the audit snapshot. Integrity checks
    /// are re-enabled whether or not the replay succeeded.
    fn replay_script(&self, db: &Database, script: &str, log: &mut OpLog) -> KeepsakeResult<RestoreOutcome> {
        let audit = AuditLog::new(db, &self.audit);

        let snapshot = audit.snapshot()?;
        match &snapshot {
            Some(s) => log.info("audit", format!("preserved {} audit rows", s.rows.len())),
            None => log.info("audit", format!("no {} table, nothing to preserve", self.audit.table)),
        }

        db.disable_integrity()?;
        log.info("integrity", "foreign key and check constraints disabled");

        let outcome = (|| -> KeepsakeResult<RestoreOutcome> {
            let replay = DatabaseRestorer::new(db, &self.policy).replay(script, log);
            log.info("replay", replay.summary());

            if db.finish_open_transaction()? {
                log.warn("replay", "script left a transaction open, closed it");
            }

            let preserved = match &snapshot {
                Some(snapshot) => Some(audit.replace_all(snapshot, log)?),
                None => None,
            };
            Ok(RestoreOutcome::Database {
                replay,
                audit: preserved,
            })
        })();

        match db.enable_integrity() {
            Ok(()) => log.info("integrity", "constraints re-enabled"),
            Err(e) => {
                log.error("integrity", format!("failed to re-enable constraints: {}", e));
                if outcome.is_ok() {
                    return Err(e);
                }
            }
        }

        outcome
    }

    fn restore_files(&self, artifact: &BackupArtifact, log: &mut OpLog) -> KeepsakeResult<RestoreOutcome> {
        let (target, expected_root) = match artifact.kind {
            ArtifactKind::Storage => (
                self.storage_dir.clone(),
                self.storage_dir
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string()),
            ),
            _ => (self.project_root.clone(), None),
        };

        log.set_path(&target);
        let merge = FileTreeExtractor::new(&artifact.path).restore_into(
            &target,
            expected_root.as_deref(),
            log,
        )?;
        Ok(RestoreOutcome::Files { target, merge })
    }
}
