//! Path management for keepsake
//!
//! Provides XDG-compliant path resolution for configuration, data, and backups.
//!
//! ## Path Resolution Order
//!
//! 1. `KEEPSAKE_HOME` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/keepsake` or `~/.config/keepsake`
//! 3. Windows: `%APPDATA%\keepsake`

use std::path::{Path, PathBuf};

use crate::error::KeepsakeError;

/// Environment variable that overrides the base directory
pub const HOME_ENV_VAR: &str = "KEEPSAKE_HOME";

/// Manages all paths used by keepsake
#[derive(Debug, Clone)]
pub struct KeepsakePaths {
    /// Base directory for all keepsake data
    base_dir: PathBuf,
}

impl KeepsakePaths {
    /// Create a new KeepsakePaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no home/config directory can be determined.
    pub fn new() -> Result<Self, KeepsakeError> {
        let base_dir = match std::env::var(HOME_ENV_VAR) {
            Ok(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => resolve_default_path()?,
        };

        Ok(Self { base_dir })
    }

    /// Create KeepsakePaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.config/keepsake/ or equivalent)
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the data directory (~/.config/keepsake/data/)
    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    /// Get the default backup directory (~/.config/keepsake/backups/)
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Lock file that serializes restores. Lives outside the backup
    /// directory so it never shows up in listings.
    pub fn restore_lock_file(&self) -> PathBuf {
        self.base_dir.join("restore.lock")
    }

    /// Resolve a settings path: absolute paths are kept, relative ones are
    /// joined onto the base directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Ensure the base, data and backup directories exist
    pub fn ensure_directories(&self) -> Result<(), KeepsakeError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| KeepsakeError::Config(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.data_dir())
            .map_err(|e| KeepsakeError::Config(format!("Failed to create data directory: {}", e)))?;

        std::fs::create_dir_all(self.backup_dir()).map_err(|e| {
            KeepsakeError::Config(format!("Failed to create backup directory: {}", e))
        })?;

        Ok(())
    }

    /// Check if keepsake has been initialized (config file exists)
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}

/// Resolve the default base directory based on platform
fn resolve_default_path() -> Result<PathBuf, KeepsakeError> {
    // XDG_CONFIG_HOME wins on every platform when it is set
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("keepsake"));
        }
    }

    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| KeepsakeError::Config("Could not determine home directory".into()))?;
    Ok(dirs.config_dir().join("keepsake"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_custom_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let paths = KeepsakePaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.base_dir(), temp_dir.path());
        assert_eq!(paths.data_dir(), temp_dir.path().join("data"));
        assert_eq!(paths.backup_dir(), temp_dir.path().join("backups"));
        assert_eq!(paths.restore_lock_file(), temp_dir.path().join("restore.lock"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let paths = KeepsakePaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(
            paths.resolve(Path::new("data/app.db")),
            temp_dir.path().join("data/app.db")
        );
        let absolute = temp_dir.path().join("elsewhere");
        assert_eq!(paths.resolve(&absolute), absolute);
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = KeepsakePaths::with_base_dir(temp_dir.path().join("nested"));

        paths.ensure_directories().unwrap();

        assert!(paths.data_dir().exists());
        assert!(paths.backup_dir().exists());
        assert!(!paths.is_initialized());
    }
}
