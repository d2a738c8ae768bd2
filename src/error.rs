//! Custom error types for keepsake
//!
//! This module defines the error hierarchy for the backup engine using
//! thiserror for ergonomic error definitions.

use thiserror::Error;

/// The main error type for keepsake operations
#[derive(Error, Debug)]
pub enum KeepsakeError {
    /// Configuration errors (missing or unwritable directories, bad settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// A required host capability is absent
    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// The artifact kind or format cannot be handled
    #[error("Unsupported artifact: {0}")]
    UnsupportedArtifact(String),

    /// The artifact could not be read or decoded
    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),

    /// Archive packing/unpacking errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// A backup run finished with at least one failed kind
    #[error("Backup failed: {0}")]
    Backup(String),

    /// Restore errors
    #[error("Restore error: {0}")]
    Restore(String),
}

impl KeepsakeError {
    /// Create a "not found" error for backup artifacts
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<std::io::Error> for KeepsakeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for KeepsakeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<rusqlite::Error> for KeepsakeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for keepsake operations
pub type KeepsakeResult<T> = Result<T, KeepsakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KeepsakeError::Config("backup directory is not writable".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: backup directory is not writable"
        );
    }

    #[test]
    fn test_not_found_error() {
        let err = KeepsakeError::backup_not_found("abc123");
        assert_eq!(err.to_string(), "Backup not found: abc123");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KeepsakeError = io_err.into();
        assert!(matches!(err, KeepsakeError::Io(_)));
    }

    #[test]
    fn test_from_sqlite_error() {
        let err: KeepsakeError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, KeepsakeError::Database(_)));
        assert!(!err.is_not_found());
    }
}
