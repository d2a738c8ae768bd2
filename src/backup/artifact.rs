//! Backup artifacts and the filename convention
//!
//! Artifacts live in one flat directory and are named
//! `<prefix><YYYYMMDD_HHMMSS><extension>`:
//!
//! | Kind     | Pattern                                      |
//! |----------|----------------------------------------------|
//! | database | `db_backup_<ts>.sql` or `.sql.gz`            |
//! | storage  | `storage_backup_<ts>.tar.gz` or `.zip`       |
//! | config   | `config_backup_<ts>.tar.gz` or `.zip`        |
//!
//! The kind comes from the prefix, the creation time from the timestamp
//! token. The id is a SHA-256 of the canonical absolute path and is never
//! stored anywhere, so renaming or moving a file gives it a new id.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{KeepsakeError, KeepsakeResult};

/// strftime pattern of the timestamp token embedded in filenames
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// What an artifact contains, derived from its filename prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Database,
    Storage,
    Config,
    Unknown,
}

impl ArtifactKind {
    /// Filename prefix for this kind (empty for `Unknown`)
    pub fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Database => "db_backup_",
            ArtifactKind::Storage => "storage_backup_",
            ArtifactKind::Config => "config_backup_",
            ArtifactKind::Unknown => "",
        }
    }

    /// Classify a filename by prefix
    pub fn from_filename(filename: &str) -> Self {
        [
            ArtifactKind::Database,
            ArtifactKind::Storage,
            ArtifactKind::Config,
        ]
        .into_iter()
        .find(|kind| filename.starts_with(kind.prefix()))
        .unwrap_or(ArtifactKind::Unknown)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Database => write!(f, "database"),
            ArtifactKind::Storage => write!(f, "storage"),
            ArtifactKind::Config => write!(f, "config"),
            ArtifactKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// On-disk format, detected from the full filename so that double
/// extensions (`.sql.gz`, `.tar.gz`) are recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    Sql,
    SqlGz,
    TarGz,
    Zip,
    Other,
}

impl ArtifactFormat {
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".sql.gz") {
            ArtifactFormat::SqlGz
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            ArtifactFormat::TarGz
        } else if lower.ends_with(".sql") {
            ArtifactFormat::Sql
        } else if lower.ends_with(".zip") {
            ArtifactFormat::Zip
        } else {
            ArtifactFormat::Other
        }
    }

    /// Extension including the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Sql => ".sql",
            ArtifactFormat::SqlGz => ".sql.gz",
            ArtifactFormat::TarGz => ".tar.gz",
            ArtifactFormat::Zip => ".zip",
            ArtifactFormat::Other => "",
        }
    }

    /// MIME type used for downloads
    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactFormat::Sql => "application/sql",
            ArtifactFormat::SqlGz | ArtifactFormat::TarGz => "application/gzip",
            ArtifactFormat::Zip => "application/zip",
            ArtifactFormat::Other => "application/octet-stream",
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactFormat::Other => write!(f, "other"),
            other => write!(f, "{}", other.extension().trim_start_matches('.')),
        }
    }
}

/// One backup file in the backup directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArtifact {
    /// Hex SHA-256 of the canonical absolute path
    pub id: String,
    pub filename: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub format: ArtifactFormat,
    /// Size in bytes
    pub size: u64,
    /// From the filename timestamp token, else the modification time
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl BackupArtifact {
    /// Build an artifact from a file on disk.
    ///
    /// Fails with `CorruptArtifact` when the file is not a regular,
    /// readable file.
    pub fn from_path(path: &Path) -> KeepsakeResult<Self> {
        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| {
                KeepsakeError::CorruptArtifact(format!("{} has no filename", path.display()))
            })?;

        let metadata = fs::metadata(path).map_err(|e| {
            KeepsakeError::CorruptArtifact(format!("{}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(KeepsakeError::CorruptArtifact(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        // Readability check: open and drop
        fs::File::open(path).map_err(|e| {
            KeepsakeError::CorruptArtifact(format!("{} is not readable: {}", path.display(), e))
        })?;

        let modified_at: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|e| {
                KeepsakeError::CorruptArtifact(format!("{}: {}", path.display(), e))
            })?;

        let created_at = parse_timestamp_token(&filename).unwrap_or(modified_at);

        Ok(Self {
            id: artifact_id(path),
            kind: ArtifactKind::from_filename(&filename),
            format: ArtifactFormat::from_filename(&filename),
            filename,
            path: path.to_path_buf(),
            size: metadata.len(),
            created_at,
            modified_at,
        })
    }
}

/// Deterministic id for an artifact path
pub fn artifact_id(path: &Path) -> String {
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(absolute.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

fn timestamp_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{8}_\d{6})").expect("timestamp token regex is valid"))
}

/// Extract and parse the `YYYYMMDD_HHMMSS` token from a filename (UTC)
pub fn parse_timestamp_token(filename: &str) -> Option<DateTime<Utc>> {
    let token = timestamp_token_regex().captures(filename)?.get(1)?.as_str();
    let naive = NaiveDateTime::parse_from_str(token, TIMESTAMP_FORMAT).ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Build the filename for a new artifact
pub fn artifact_filename(
    kind: ArtifactKind,
    timestamp: DateTime<Utc>,
    format: ArtifactFormat,
) -> String {
    format!(
        "{}{}{}",
        kind.prefix(),
        timestamp.format(TIMESTAMP_FORMAT),
        format.extension()
    )
}

/// Hidden sibling path used while a file is still being written.
///
/// The leading dot keeps it out of the prefix convention so the catalog
/// classifies it as `unknown` rather than as a finished artifact.
pub fn partial_path(final_path: &Path, suffix: &str) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{}.{}", name, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_kind_from_prefix() {
        assert_eq!(
            ArtifactKind::from_filename("db_backup_20240115_093000.sql.gz"),
            ArtifactKind::Database
        );
        assert_eq!(
            ArtifactKind::from_filename("storage_backup_20240115_093000.tar.gz"),
            ArtifactKind::Storage
        );
        assert_eq!(
            ArtifactKind::from_filename("config_backup_20240115_093000.zip"),
            ArtifactKind::Config
        );
        assert_eq!(ArtifactKind::from_filename("notes.txt"), ArtifactKind::Unknown);
        assert_eq!(
            ArtifactKind::from_filename(".db_backup_20240115_093000.sql.tmp"),
            ArtifactKind::Unknown
        );
    }

    #[test]
    fn test_format_handles_double_extension() {
        assert_eq!(ArtifactFormat::from_filename("a.sql.gz"), ArtifactFormat::SqlGz);
        assert_eq!(ArtifactFormat::from_filename("a.tar.gz"), ArtifactFormat::TarGz);
        assert_eq!(ArtifactFormat::from_filename("a.sql"), ArtifactFormat::Sql);
        assert_eq!(ArtifactFormat::from_filename("a.ZIP"), ArtifactFormat::Zip);
        assert_eq!(ArtifactFormat::from_filename("a.gz"), ArtifactFormat::Other);
        assert_eq!(ArtifactFormat::SqlGz.content_type(), "application/gzip");
        assert_eq!(ArtifactFormat::Sql.content_type(), "application/sql");
        assert_eq!(ArtifactFormat::SqlGz.to_string(), "sql.gz");
    }

    #[test]
    fn test_parse_timestamp_token() {
        let ts = parse_timestamp_token("db_backup_20240115_093000.sql.gz").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap());

        assert!(parse_timestamp_token("db_backup_20241345_093000.sql").is_none());
        assert!(parse_timestamp_token("db_backup.sql").is_none());
    }

    #[test]
    fn test_artifact_filename() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        assert_eq!(
            artifact_filename(ArtifactKind::Database, ts, ArtifactFormat::SqlGz),
            "db_backup_20240115_093000.sql.gz"
        );
        assert_eq!(
            artifact_filename(ArtifactKind::Config, ts, ArtifactFormat::TarGz),
            "config_backup_20240115_093000.tar.gz"
        );
    }

    #[test]
    fn test_from_path_classifies_database_artifact() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db_backup_20240115_093000.sql.gz");
        fs::write(&path, b"data").unwrap();

        let artifact = BackupArtifact::from_path(&path).unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Database);
        assert_eq!(artifact.format, ArtifactFormat::SqlGz);
        assert_eq!(
            artifact.created_at,
            Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap()
        );
        assert_eq!(artifact.size, 4);
        assert_eq!(artifact.id, artifact_id(&path));
    }

    #[test]
    fn test_created_at_falls_back_to_mtime() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manual-dump.sql");
        fs::write(&path, b"SELECT 1;").unwrap();

        let artifact = BackupArtifact::from_path(&path).unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Unknown);
        assert_eq!(artifact.created_at, artifact.modified_at);
    }

    #[test]
    fn test_id_changes_on_rename() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("db_backup_20240115_093000.sql");
        fs::write(&first, b"x").unwrap();
        let before = artifact_id(&first);
        assert_eq!(before, artifact_id(&first));

        let second = temp.path().join("db_backup_20240116_093000.sql");
        fs::rename(&first, &second).unwrap();
        assert_ne!(before, artifact_id(&second));
    }

    #[test]
    fn test_directory_is_not_an_artifact() {
        let temp = TempDir::new().unwrap();
        let err = BackupArtifact::from_path(temp.path()).unwrap_err();
        assert!(matches!(err, KeepsakeError::CorruptArtifact(_)));
    }

    #[test]
    fn test_partial_path_is_hidden() {
        let p = partial_path(Path::new("/b/db_backup_20240115_093000.sql.gz"), "partial");
        assert_eq!(p, PathBuf::from("/b/.db_backup_20240115_093000.sql.gz.partial"));
    }
}
