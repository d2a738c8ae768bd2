//! Settings for keepsake
//!
//! Describes what gets backed up (database, storage tree, config files),
//! where artifacts live, how the audit table looks and how replay errors are
//! classified. Persisted as `config.json` in the base directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::KeepsakePaths;
use crate::error::KeepsakeError;

/// Which dump strategy to use for database backups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DumpStrategyKind {
    /// Probe the host for the external tool, fall back to portable
    #[default]
    Auto,
    /// Always use the in-process dump
    Portable,
    /// Prefer the external `sqlite3` binary
    External,
}

/// Database connection and dump settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Dump strategy selection
    #[serde(default)]
    pub dump_strategy: DumpStrategyKind,

    /// Whether database dumps are gzip-compressed
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Whether foreign key enforcement is switched on for connections
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            dump_strategy: DumpStrategyKind::default(),
            compress: true,
            foreign_keys: true,
        }
    }
}

/// Shape of the append-only audit table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Table name
    #[serde(default = "default_audit_table")]
    pub table: String,
    /// Auto-generated identity key column (never preserved)
    #[serde(default = "default_audit_key")]
    pub key_column: String,
    /// Timestamp column used for newest-first ordering
    #[serde(default = "default_audit_timestamp")]
    pub timestamp_column: String,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            table: default_audit_table(),
            key_column: default_audit_key(),
            timestamp_column: default_audit_timestamp(),
        }
    }
}

/// Classification of replay errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySettings {
    /// Case-insensitive substrings marking an error as ignorable
    #[serde(default = "default_ignorable_errors")]
    pub ignorable_errors: Vec<String>,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            ignorable_errors: default_ignorable_errors(),
        }
    }
}

/// Settings for keepsake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Application file tree backed up by storage backups
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Project root; config files are stored relative to it
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Allow-list of config files, relative to the project root
    #[serde(default = "default_config_files")]
    pub config_files: Vec<PathBuf>,

    /// Override for the backup directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    /// Audit table shape
    #[serde(default)]
    pub audit: AuditSettings,

    /// Replay error classification
    #[serde(default)]
    pub replay: ReplaySettings,

    /// Take a backup of the same kind before a forced restore
    #[serde(default = "default_true")]
    pub safety_backup_before_restore: bool,
}

fn default_schema_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/app.db")
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage")
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_config_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from(".env"),
        PathBuf::from("Cargo.toml"),
        PathBuf::from("Cargo.lock"),
    ]
}

fn default_audit_table() -> String {
    "activity_log".to_string()
}

fn default_audit_key() -> String {
    "id".to_string()
}

fn default_audit_timestamp() -> String {
    "created_at".to_string()
}

fn default_ignorable_errors() -> Vec<String> {
    vec!["already exists".to_string(), "duplicate".to_string()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            database: DatabaseSettings::default(),
            storage_dir: default_storage_dir(),
            project_root: default_project_root(),
            config_files: default_config_files(),
            backup_dir: None,
            audit: AuditSettings::default(),
            replay: ReplaySettings::default(),
            safety_backup_before_restore: true,
        }
    }
}

impl Settings {
    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &KeepsakePaths) -> Result<Self, KeepsakeError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                KeepsakeError::Io(format!("Failed to read settings file: {}", e))
            })?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                KeepsakeError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &KeepsakePaths) -> Result<(), KeepsakeError> {
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            KeepsakeError::Config(format!("Failed to serialize settings: {}", e))
        })?;

        std::fs::write(paths.settings_file(), contents).map_err(|e| {
            KeepsakeError::Io(format!("Failed to write settings file: {}", e))
        })?;

        Ok(())
    }

    /// Absolute database path
    pub fn database_path(&self, paths: &KeepsakePaths) -> PathBuf {
        paths.resolve(&self.database.path)
    }

    /// Absolute storage directory
    pub fn storage_dir(&self, paths: &KeepsakePaths) -> PathBuf {
        paths.resolve(&self.storage_dir)
    }

    /// Absolute project root
    pub fn project_root(&self, paths: &KeepsakePaths) -> PathBuf {
        paths.resolve(&self.project_root)
    }

    /// Absolute backup directory (override or the default under the base dir)
    pub fn backup_dir(&self, paths: &KeepsakePaths) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => paths.resolve(dir),
            None => paths.backup_dir(),
        }
    }
}
