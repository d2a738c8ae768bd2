//! Backup system for keepsake
//!
//! Produces, lists and restores backup artifacts of a deployment's
//! database, storage tree and configuration files.
//!
//! # Architecture
//!
//! - `BackupOrchestrator`: runs backups of one or all kinds, sharing one
//!   timestamp per run
//! - `BackupCatalog`: lists, counts, reads and deletes artifacts in the
//!   backup directory
//! - `RestoreCoordinator`: restores an artifact into the live deployment,
//!   one restore at a time
//!
//! # Artifact naming
//!
//! Artifacts live in one flat directory. The filename prefix gives the kind
//! (`db_backup_`, `storage_backup_`, `config_backup_`) and the embedded
//! `YYYYMMDD_HHMMSS` token gives the creation time. Ids are derived from
//! the path and never stored.
//!
//! # Example
//!
//! ```rust,ignore
//! use keepsake::backup::{BackupCatalog, BackupKind, BackupOrchestrator, RestoreCoordinator};
//! use keepsake::config::{KeepsakePaths, Settings};
//!
//! let paths = KeepsakePaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//!
//! let report = BackupOrchestrator::from_settings(&paths, &settings).run(BackupKind::All, false);
//! println!("{}", report.summary());
//!
//! let catalog = BackupCatalog::new(settings.backup_dir(&paths));
//! if let Some(latest) = catalog.get_latest(None) {
//!     let restore = RestoreCoordinator::new(&paths, &settings).restore(&latest.id)?;
//!     println!("{}", restore.summary);
//! }
//! ```

pub mod artifact;
mod catalog;
mod orchestrator;
mod restore;

pub use artifact::{ArtifactFormat, ArtifactKind, BackupArtifact};
pub use catalog::{format_size, ArtifactDownload, BackupCatalog, BackupPage, BackupStatistics};
pub use orchestrator::{BackupKind, BackupOrchestrator, KindResult, RunReport};
pub use restore::{RestoreCoordinator, RestoreLock, RestoreOutcome, RestoreReport};
