//! Packing file trees into `.tar.gz` archives

use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;

use super::ArchiveEntry;
use crate::backup::artifact::partial_path;
use crate::error::{KeepsakeError, KeepsakeResult};
use crate::logging::OpLog;

/// What a `FileTreeArchiver` packs
#[derive(Debug, Clone)]
pub enum ArchiveSource {
    /// Every regular file below a directory
    Directory(PathBuf),
    /// An allow-list of files relative to a root; missing files are skipped
    Files { root: PathBuf, files: Vec<PathBuf> },
}

/// Packs a file tree into a single archive
#[derive(Debug, Clone)]
pub struct FileTreeArchiver {
    source: ArchiveSource,
    /// Folder every entry is stored under
    prefix: Option<PathBuf>,
}

impl FileTreeArchiver {
    /// Archive every regular file below `root`
    pub fn directory(root: impl Into<PathBuf>) -> Self {
        Self {
            source: ArchiveSource::Directory(root.into()),
            prefix: None,
        }
    }

    /// Archive the allow-listed `files` that exist under `root`
    pub fn files(root: impl Into<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self {
            source: ArchiveSource::Files {
                root: root.into(),
                files,
            },
            prefix: None,
        }
    }

    /// Store every entry under the folder `prefix` inside the archive
    pub fn under(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Resolve the entries this archiver would write
    pub fn collect(&self, log: &mut OpLog) -> KeepsakeResult<Vec<ArchiveEntry>> {
        let mut entries = match &self.source {
            ArchiveSource::Directory(root) => collect_directory(root, log)?,
            ArchiveSource::Files { root, files } => collect_files(root, files, log),
        };
        if let Some(prefix) = &self.prefix {
            for entry in &mut entries {
                entry.relative_path = prefix.join(&entry.relative_path);
            }
        }
        Ok(entries)
    }

    /// Number of files that would be archived (used for dry runs)
    pub fn count(&self, log: &mut OpLog) -> KeepsakeResult<usize> {
        Ok(self.collect(log)?.len())
    }

    /// Write the archive to `output` and return the number of files in it.
    ///
    /// The archive is built in a hidden partial file and renamed into place
    /// once complete. A file that vanishes between collection and packing
    /// is skipped with a warning.
    pub fn write(&self, output: &Path, log: &mut OpLog) -> KeepsakeResult<usize> {
        let entries = self.collect(log)?;
        let partial = partial_path(output, "partial");

        let result = (|| -> KeepsakeResult<usize> {
            let encoder = GzEncoder::new(File::create(&partial)?, Compression::best());
            let mut builder = tar::Builder::new(encoder);
            builder.follow_symlinks(false);
            let mut written = 0usize;

            for entry in &entries {
                match File::open(&entry.source) {
                    Ok(mut file) => {
                        builder
                            .append_file(&entry.relative_path, &mut file)
                            .map_err(|e| {
                                KeepsakeError::Archive(format!(
                                    "Failed to add {}: {}",
                                    entry.relative_path.display(),
                                    e
                                ))
                            })?;
                        written += 1;
                    }
                    Err(e) => log.warn(
                        "archive",
                        format!("skipping {}: {}", entry.source.display(), e),
                    ),
                }
            }

            let encoder = builder
                .into_inner()
                .map_err(|e| KeepsakeError::Archive(format!("Failed to finish archive: {}", e)))?;
            encoder.finish()?.sync_all()?;
            fs::rename(&partial, output)?;
            Ok(written)
        })();

        match result {
            Ok(written) => {
                log.info(
                    "archive",
                    format!("archived {} files into {}", written, output.display()),
                );
                Ok(written)
            }
            Err(e) => {
                let _ = fs::remove_file(&partial);
                log.error("archive", e.to_string());
                Err(e)
            }
        }
    }
}

fn collect_directory(root: &Path, log: &mut OpLog) -> KeepsakeResult<Vec<ArchiveEntry>> {
    if !root.is_dir() {
        return Err(KeepsakeError::Config(format!(
            "Directory not found: {}",
            root.display()
        )));
    }

    let mut entries = Vec::new();
    for item in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                log.warn("collect", format!("skipping unreadable entry: {}", e));
                continue;
            }
        };
        if !item.file_type().is_file() {
            continue;
        }

        let relative = match item.path().strip_prefix(root) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => continue,
        };
        let size = item.metadata().map(|m| m.len()).unwrap_or(0);
        entries.push(ArchiveEntry {
            relative_path: relative,
            source: item.path().to_path_buf(),
            size,
        });
    }
    Ok(entries)
}

fn collect_files(root: &Path, files: &[PathBuf], log: &mut OpLog) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();
    for file in files {
        let source = root.join(file);
        let metadata = match fs::metadata(&source) {
            Ok(m) if m.is_file() => m,
            _ => {
                log.debug("collect", format!("{} not present, skipped", source.display()));
                continue;
            }
        };

        let relative = match source.strip_prefix(root) {
            Ok(relative) => normalize_relative(relative),
            Err(_) => PathBuf::from(source.file_name().unwrap_or_default()),
        };
        entries.push(ArchiveEntry {
            relative_path: relative,
            source,
            size: metadata.len(),
        });
    }
    entries
}

/// Drop `.` components so `./.env` is stored as `.env`
fn normalize_relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FileTreeExtractor;
    use tempfile::TempDir;

    fn storage_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("uploads/2024")).unwrap();
        fs::write(temp.path().join("readme.txt"), "root").unwrap();
        fs::write(temp.path().join("uploads/a.png"), [1u8, 2, 3]).unwrap();
        fs::write(temp.path().join("uploads/2024/b.pdf"), "pdf").unwrap();
        temp
    }

    #[test]
    fn test_directory_entries_are_relative() {
        let tree = storage_tree();
        let archiver = FileTreeArchiver::directory(tree.path());
        let entries = archiver.collect(&mut OpLog::new("backup")).unwrap();

        let paths: Vec<_> = entries.iter().map(|e| e.relative_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("readme.txt"),
                PathBuf::from("uploads/2024/b.pdf"),
                PathBuf::from("uploads/a.png"),
            ]
        );
    }

    #[test]
    fn test_write_directory_archive() {
        let tree = storage_tree();
        let out_dir = TempDir::new().unwrap();
        let output = out_dir.path().join("storage_backup_20240115_093000.tar.gz");

        let count = FileTreeArchiver::directory(tree.path())
            .write(&output, &mut OpLog::new("backup"))
            .unwrap();
        assert_eq!(count, 3);
        assert!(output.is_file());

        let mut names = FileTreeExtractor::new(&output).entries().unwrap();
        names.sort();
        assert_eq!(names[0], PathBuf::from("readme.txt"));
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_prefixed_entries_are_wrapped() {
        let tree = storage_tree();
        let out_dir = TempDir::new().unwrap();
        let output = out_dir.path().join("storage_backup_20240115_093000.tar.gz");

        FileTreeArchiver::directory(tree.path())
            .under("storage")
            .write(&output, &mut OpLog::new("backup"))
            .unwrap();

        let names = FileTreeExtractor::new(&output).entries().unwrap();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.starts_with("storage")));
        assert!(names.contains(&PathBuf::from("storage/uploads/a.png")));
    }

    #[test]
    fn test_allow_list_skips_missing_files() {
        let project = TempDir::new().unwrap();
        fs::write(project.path().join(".env"), "APP_KEY=secret").unwrap();
        let out_dir = TempDir::new().unwrap();
        let output = out_dir.path().join("config_backup_20240115_093000.tar.gz");

        let archiver = FileTreeArchiver::files(
            project.path(),
            vec![
                PathBuf::from("./.env"),
                PathBuf::from("Cargo.toml"),
                PathBuf::from("Cargo.lock"),
            ],
        );
        assert_eq!(archiver.count(&mut OpLog::new("backup")).unwrap(), 1);

        let count = archiver.write(&output, &mut OpLog::new("backup")).unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            FileTreeExtractor::new(&output).entries().unwrap(),
            vec![PathBuf::from(".env")]
        );
    }

    #[test]
    fn test_missing_directory_is_config_error() {
        let temp = TempDir::new().unwrap();
        let err = FileTreeArchiver::directory(temp.path().join("absent"))
            .count(&mut OpLog::new("backup"))
            .unwrap_err();
        assert!(matches!(err, KeepsakeError::Config(_)));
    }
}
