//! keepsake - backup and restore engine for application deployments
//!
//! This library produces, catalogs and restores backups of three parts of a
//! deployment: its SQLite database, its storage file tree and a set of
//! configuration files. Restoring a database preserves the append-only audit
//! trail that was live when the restore began.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `logging`: Tracing setup and the per-operation `OpLog`
//! - `database`: SQLite access, dump strategies and script replay
//! - `archive`: tar.gz packing and extraction of file trees
//! - `audit`: The audit table, its entries and snapshots
//! - `backup`: Orchestration, catalog and restore
//! - `cli`, `display`: Command handlers and terminal formatting
//!
//! # Example
//!
//! ```rust,ignore
//! use keepsake::backup::{BackupKind, BackupOrchestrator};
//! use keepsake::config::{paths::KeepsakePaths, settings::Settings};
//!
//! let paths = KeepsakePaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let report = BackupOrchestrator::from_settings(&paths, &settings).run(BackupKind::All, false);
//! ```

pub mod archive;
pub mod audit;
pub mod backup;
pub mod cli;
pub mod config;
pub mod database;
pub mod display;
pub mod error;
pub mod logging;

pub use error::KeepsakeError;
