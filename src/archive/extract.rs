//! Unpacking archives and merging them into a live tree

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Serialize;
use walkdir::WalkDir;

use crate::backup::artifact::ArtifactFormat;
use crate::error::{KeepsakeError, KeepsakeResult};
use crate::logging::OpLog;

/// Result of merging an extracted tree into a target directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub copied: usize,
    pub failed: usize,
    pub failures: Vec<String>,
}

/// Reads storage/config archives
#[derive(Debug, Clone)]
pub struct FileTreeExtractor {
    archive: PathBuf,
}

impl FileTreeExtractor {
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
        }
    }

    fn open(&self) -> KeepsakeResult<tar::Archive<GzDecoder<BufReader<File>>>> {
        let filename = self
            .archive
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        match ArtifactFormat::from_filename(&filename) {
            ArtifactFormat::TarGz => {}
            ArtifactFormat::Zip => {
                return Err(KeepsakeError::UnsupportedArtifact(format!(
                    "{}: zip archives can be listed and downloaded but not extracted",
                    filename
                )))
            }
            other => {
                return Err(KeepsakeError::UnsupportedArtifact(format!(
                    "{} is not a file archive (format: {})",
                    filename, other
                )))
            }
        }

        let file = File::open(&self.archive)?;
        Ok(tar::Archive::new(GzDecoder::new(BufReader::new(file))))
    }

    /// Relative paths of the regular files in the archive
    pub fn entries(&self) -> KeepsakeResult<Vec<PathBuf>> {
        let mut archive = self.open()?;
        let corrupt = |e: std::io::Error| {
            KeepsakeError::CorruptArtifact(format!("{}: {}", self.archive.display(), e))
        };

        let mut paths = Vec::new();
        for entry in archive.entries().map_err(corrupt)? {
            let entry = entry.map_err(corrupt)?;
            if entry.header().entry_type().is_file() {
                paths.push(entry.path().map_err(corrupt)?.into_owned());
            }
        }
        Ok(paths)
    }

    /// Unpack every entry below `dir`. Entries escaping `dir` are skipped.
    pub fn extract_to(&self, dir: &Path) -> KeepsakeResult<()> {
        let mut archive = self.open()?;
        archive.set_preserve_permissions(false);
        archive.unpack(dir).map_err(|e| {
            KeepsakeError::CorruptArtifact(format!(
                "{} could not be extracted: {}",
                self.archive.display(),
                e
            ))
        })
    }

    /// Extract into a fresh temporary directory, then copy every file into
    /// `target`, overwriting existing files.
    ///
    /// `expected_root` names the top-level folder the files live under when
    /// an archive wraps them in one. The temporary directory is always
    /// removed.
    pub fn restore_into(
        &self,
        target: &Path,
        expected_root: Option<&str>,
        log: &mut OpLog,
    ) -> KeepsakeResult<MergeReport> {
        let staging = tempfile::Builder::new()
            .prefix("keepsake-extract-")
            .tempdir()
            .map_err(|e| KeepsakeError::Io(format!("Failed to create temporary directory: {}", e)))?;
        log.info(
            "extract",
            format!("extracting into {}", staging.path().display()),
        );

        let result = self.extract_to(staging.path()).and_then(|()| {
            let root = locate_root(staging.path(), expected_root);
            log.info(
                "merge",
                format!("merging {} into {}", root.display(), target.display()),
            );
            merge_tree(&root, target, log)
        });

        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            log.warn(
                "cleanup",
                format!("failed to remove {}: {}", staging_path.display(), e),
            );
        }

        result
    }
}

/// Directory inside an extraction that holds the files to restore.
///
/// Uses `<extracted>/<expected>` only when that folder is the sole
/// top-level entry, so a tree that merely contains a subfolder of the same
/// name is restored as-is.
pub fn locate_root(extracted: &Path, expected: Option<&str>) -> PathBuf {
    let Some(name) = expected.filter(|name| !name.is_empty()) else {
        return extracted.to_path_buf();
    };
    let top_level: Vec<_> = match fs::read_dir(extracted) {
        Ok(read_dir) => read_dir.filter_map(Result::ok).map(|e| e.file_name()).collect(),
        Err(_) => return extracted.to_path_buf(),
    };

    let wrapper = extracted.join(name);
    if top_level.len() == 1 && top_level[0].to_str() == Some(name) && wrapper.is_dir() {
        wrapper
    } else {
        extracted.to_path_buf()
    }
}

/// Copy every regular file under `from` into `to`, creating directories as
/// needed. Per-file failures are recorded and skipped.
pub fn merge_tree(from: &Path, to: &Path, log: &mut OpLog) -> KeepsakeResult<MergeReport> {
    fs::create_dir_all(to).map_err(|e| {
        KeepsakeError::Config(format!("Cannot create {}: {}", to.display(), e))
    })?;

    let mut report = MergeReport::default();
    for item in WalkDir::new(from).follow_links(false) {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                report.failed += 1;
                report.failures.push(e.to_string());
                log.warn("merge", format!("unreadable entry: {}", e));
                continue;
            }
        };
        if !item.file_type().is_file() {
            continue;
        }
        let Ok(relative) = item.path().strip_prefix(from) else {
            continue;
        };

        let destination = to.join(relative);
        let copied = destination
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::copy(item.path(), &destination));

        match copied {
            Ok(_) => report.copied += 1,
            Err(e) => {
                let message = format!("{}: {}", relative.display(), e);
                log.warn("merge", format!("copy failed for {}", message));
                report.failed += 1;
                report.failures.push(message);
            }
        }
    }

    log.info(
        "merge",
        format!("copied {} files, {} failed", report.copied, report.failed),
    );
    Ok(report)
}
