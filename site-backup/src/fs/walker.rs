//! Candidate file enumeration for backups.
//!
//! Walks the configured include directories of a site and returns the
//! ordered list of regular files that belong in an archive. The skip
//! predicates are applied while walking, so excluded directories are pruned
//! instead of being traversed and filtered afterwards.

use super::filter::{should_skip_extension, should_skip_path};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// A file selected for backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// `/`-separated path relative to the site root
    pub path: String,

    /// Size in bytes at enumeration time
    pub size: u64,
}

/// Result of enumerating a site.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub files: Vec<FileEntry>,

    /// Entries that could not be inspected; recorded, not fatal
    pub errors: Vec<String>,
}

impl Enumeration {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Enumerate backup candidates below `include_dirs` (relative to `site_root`).
///
/// `exclude_dir` is the backup storage directory; it is pruned even when it
/// has been configured under a name the path filter doesn't know.
pub fn collect_candidates(
    site_root: &Path,
    include_dirs: &[PathBuf],
    exclude_dir: &Path,
) -> Enumeration {
    let mut result = Enumeration::default();

    for include in include_dirs {
        let start = site_root.join(include);
        if !start.is_dir() {
            tracing::debug!(path = %start.display(), "Include directory missing, skipping");
            continue;
        }

        let walker = WalkDir::new(&start)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_excluded_dir(entry, site_root, exclude_dir));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let at = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| start.display().to_string());
                    result.errors.push(format!("Cannot read {}: {}", at, e));
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = relative_path(entry.path(), site_root) else {
                result.errors.push(format!(
                    "Skipping file with non UTF-8 name: {}",
                    entry.path().display()
                ));
                continue;
            };

            if should_skip_path(&relative) || should_skip_extension(&relative) {
                continue;
            }

            match entry.metadata() {
                Ok(metadata) => result.files.push(FileEntry {
                    path: relative,
                    size: metadata.len(),
                }),
                Err(e) => result.errors.push(format!("Cannot stat {}: {}", relative, e)),
            }
        }
    }

    result
}

/// Check if a directory entry should be pruned from the walk
fn is_excluded_dir(entry: &DirEntry, site_root: &Path, exclude_dir: &Path) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    if entry.path() == exclude_dir {
        return true;
    }
    match relative_path(entry.path(), site_root) {
        Some(relative) => should_skip_path(&relative),
        None => false,
    }
}

/// `/`-joined path of `path` below `root`, or None for non UTF-8 names.
fn relative_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_str()?);
        }
    }
    Some(parts.join("/"))
}
