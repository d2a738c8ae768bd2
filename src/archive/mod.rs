//! File tree archives
//!
//! Storage and config backups are gzip-compressed tar archives. Each entry
//! is stored under its path relative to the archived root, optionally
//! wrapped in one folder (storage archives use the storage folder's name).
//! Extraction unwraps that folder only when it is the sole top-level entry.
//!
//! - `FileTreeArchiver` packs a directory or an explicit file list
//! - `FileTreeExtractor` unpacks into a temporary directory and merges the
//!   result into a live target

mod extract;
mod pack;

use std::path::PathBuf;

pub use extract::{locate_root, merge_tree, FileTreeExtractor, MergeReport};
pub use pack::FileTreeArchiver;

/// One file headed for an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive
    pub relative_path: PathBuf,
    /// File the bytes are read from
    pub source: PathBuf,
    pub size: u64,
}
