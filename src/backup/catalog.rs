//! Backup catalog
//!
//! Read-only view of the backup directory plus the explicit `delete`
//! operation. Nothing is cached: every call re-scans the directory, so the
//! catalog always agrees with what is on disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{KeepsakeError, KeepsakeResult};

use super::artifact::{ArtifactKind, BackupArtifact};

/// One page of the listing
#[derive(Debug, Clone, Serialize)]
pub struct BackupPage {
    pub items: Vec<BackupArtifact>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// Aggregate figures for dashboards
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupStatistics {
    pub total_backups: usize,
    /// Size in bytes
    pub total_size: u64,
    pub total_size_formatted: String,
    pub database_backups: usize,
    pub storage_backups: usize,
    pub config_backups: usize,
    pub latest_backup: Option<BackupArtifact>,
    pub oldest_backup: Option<BackupArtifact>,
}

/// An artifact's bytes, ready to hand to a transport
#[derive(Debug, Clone)]
pub struct ArtifactDownload {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Enumerates and manages the artifacts in one backup directory
#[derive(Debug, Clone)]
pub struct BackupCatalog {
    backup_dir: PathBuf,
}

impl BackupCatalog {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Every readable artifact, newest modification first.
    ///
    /// Entries that vanish or cannot be read mid-scan are skipped with a
    /// warning. A missing directory is an empty catalog.
    pub fn scan(&self) -> Vec<BackupArtifact> {
        let read_dir = match fs::read_dir(&self.backup_dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                if self.backup_dir.exists() {
                    tracing::warn!(
                        path = %self.backup_dir.display(),
                        error = %e,
                        "backup directory is not readable"
                    );
                }
                return Vec::new();
            }
        };

        let mut artifacts = Vec::new();
        for entry in read_dir {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };

            // in-flight partial files are hidden
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }

            let path = entry.path();
            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping entry");
                    continue;
                }
            }

            match BackupArtifact::from_path(&path) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping entry"),
            }
        }

        artifacts.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        artifacts
    }

    /// One page of the listing. `page` is 1-based; `per_page` is at least 1.
    pub fn list(&self, page: usize, per_page: usize) -> BackupPage {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let all = self.scan();
        let total = all.len();

        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();

        BackupPage {
            items,
            total,
            page,
            per_page,
            total_pages: total.div_ceil(per_page),
        }
    }

    /// Aggregate statistics. Never fails; a missing or unreadable
    /// directory gives all zeros.
    pub fn statistics(&self) -> BackupStatistics {
        let artifacts = self.scan();
        let mut stats = BackupStatistics {
            total_size_formatted: format_size(0),
            ..Default::default()
        };

        for artifact in &artifacts {
            stats.total_backups += 1;
            stats.total_size += artifact.size;
            match artifact.kind {
                ArtifactKind::Database => stats.database_backups += 1,
                ArtifactKind::Storage => stats.storage_backups += 1,
                ArtifactKind::Config => stats.config_backups += 1,
                ArtifactKind::Unknown => {}
            }
        }

        stats.total_size_formatted = format_size(stats.total_size);
        stats.latest_backup = artifacts.first().cloned();
        stats.oldest_backup = artifacts.last().cloned();
        stats
    }

    /// Look an artifact up by id
    pub fn get(&self, id: &str) -> KeepsakeResult<BackupArtifact> {
        self.scan()
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| KeepsakeError::backup_not_found(id))
    }

    /// Look an artifact up by filename
    pub fn get_by_filename(&self, filename: &str) -> KeepsakeResult<BackupArtifact> {
        self.scan()
            .into_iter()
            .find(|a| a.filename == filename)
            .ok_or_else(|| KeepsakeError::backup_not_found(filename))
    }

    /// The most recently written artifact, optionally of one kind
    pub fn get_latest(&self, kind: Option<ArtifactKind>) -> Option<BackupArtifact> {
        self.scan()
            .into_iter()
            .find(|a| kind.map_or(a.kind != ArtifactKind::Unknown, |k| a.kind == k))
    }

    /// Remove an artifact from disk
    pub fn delete(&self, id: &str) -> KeepsakeResult<BackupArtifact> {
        let artifact = self.get(id)?;
        fs::remove_file(&artifact.path).map_err(|e| {
            KeepsakeError::Io(format!("Failed to delete {}: {}", artifact.filename, e))
        })?;
        tracing::info!(artifact_id = %artifact.id, filename = %artifact.filename, "backup deleted");
        Ok(artifact)
    }

    /// Read an artifact for download
    pub fn download(&self, id: &str) -> KeepsakeResult<ArtifactDownload> {
        let artifact = self.get(id)?;
        let bytes = fs::read(&artifact.path).map_err(|e| {
            KeepsakeError::Io(format!("Failed to read {}: {}", artifact.filename, e))
        })?;
        Ok(ArtifactDownload {
            content_type: artifact.format.content_type(),
            filename: artifact.filename,
            bytes,
        })
    }
}

/// Format a file size in human-readable form
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_artifact(dir: &Path, name: &str, bytes: &[u8], age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        path
    }

    fn populated() -> (TempDir, BackupCatalog) {
        let temp = TempDir::new().unwrap();
        write_artifact(temp.path(), "db_backup_20240115_093000.sql.gz", &[0; 100], 300);
        write_artifact(temp.path(), "db_backup_20240116_093000.sql", &[0; 50], 200);
        write_artifact(temp.path(), "storage_backup_20240116_093000.tar.gz", &[0; 2048], 100);
        write_artifact(temp.path(), "config_backup_20240117_093000.tar.gz", &[0; 10], 10);
        write_artifact(temp.path(), "notes.txt", b"hi", 400);
        fs::create_dir(temp.path().join("nested")).unwrap();
        let catalog = BackupCatalog::new(temp.path());
        (temp, catalog)
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let catalog = BackupCatalog::new(temp.path().join("absent"));

        let page = catalog.list(1, 20);
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);

        let stats = catalog.statistics();
        assert_eq!(stats.total_backups, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.total_size_formatted, "0 B");
        assert!(stats.latest_backup.is_none());
        assert!(stats.oldest_backup.is_none());
    }

    #[test]
    fn test_list_sorted_newest_first_and_skips_directories() {
        let (_temp, catalog) = populated();
        let page = catalog.list(1, 20);

        assert_eq!(page.total, 5);
        assert_eq!(page.items[0].filename, "config_backup_20240117_093000.tar.gz");
        assert_eq!(page.items[4].filename, "notes.txt");
        assert_eq!(page.items[4].kind, ArtifactKind::Unknown);
    }

    #[test]
    fn test_hidden_partial_files_are_not_listed() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".db_backup_20240115_093000.sql.gz.partial"), b"x").unwrap();
        fs::write(temp.path().join("db_backup_20240115_093000.sql.gz"), b"x").unwrap();

        let scanned = BackupCatalog::new(temp.path()).scan();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].filename, "db_backup_20240115_093000.sql.gz");
    }

    #[test]
    fn test_paging() {
        let (_temp, catalog) = populated();

        let page = catalog.list(2, 2);
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].filename, "db_backup_20240116_093000.sql");

        let last = catalog.list(3, 2);
        assert_eq!(last.items.len(), 1);

        let clamped = catalog.list(0, 0);
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.per_page, 1);
        assert_eq!(clamped.total_pages, 5);
    }

    #[test]
    fn test_statistics_counts_by_kind() {
        let (_temp, catalog) = populated();
        let stats = catalog.statistics();

        assert_eq!(stats.total_backups, 5);
        assert_eq!(stats.total_size, 100 + 50 + 2048 + 10 + 2);
        assert_eq!(stats.total_size_formatted, "2.2 KB");
        assert_eq!(stats.database_backups, 2);
        assert_eq!(stats.storage_backups, 1);
        assert_eq!(stats.config_backups, 1);
        assert_eq!(
            stats.latest_backup.unwrap().filename,
            "config_backup_20240117_093000.tar.gz"
        );
    }

    #[test]
    fn test_get_and_delete() {
        let (_temp, catalog) = populated();
        let target = catalog.get_by_filename("db_backup_20240115_093000.sql.gz").unwrap();
        assert_eq!(catalog.get(&target.id).unwrap().path, target.path);

        let deleted = catalog.delete(&target.id).unwrap();
        assert!(!deleted.path.exists());
        assert_eq!(catalog.list(1, 20).total, 4);
        assert!(catalog.get(&target.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let (_temp, catalog) = populated();
        assert!(catalog.delete("deadbeef").unwrap_err().is_not_found());
        assert!(catalog.download("deadbeef").unwrap_err().is_not_found());
    }

    #[test]
    fn test_download_content_type() {
        let (_temp, catalog) = populated();
        let sql = catalog.get_by_filename("db_backup_20240116_093000.sql").unwrap();

        let download = catalog.download(&sql.id).unwrap();
        assert_eq!(download.filename, "db_backup_20240116_093000.sql");
        assert_eq!(download.content_type, "application/sql");
        assert_eq!(download.bytes.len(), 50);
    }

    #[test]
    fn test_get_latest_by_kind() {
        let (_temp, catalog) = populated();
        let latest_db = catalog.get_latest(Some(ArtifactKind::Database)).unwrap();
        assert_eq!(latest_db.filename, "db_backup_20240116_093000.sql");
        assert_eq!(
            catalog.get_latest(None).unwrap().filename,
            "config_backup_20240117_093000.tar.gz"
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
