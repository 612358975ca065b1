//! Detection of files that already exist at the destination

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{CopyError, Result};
use crate::validator::classify_read_error;

/// Number of conflicting paths kept as examples
pub const MAX_SAMPLES: usize = 5;

/// Overlap between the source tree and an existing destination subtree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Relative file paths present on both sides
    pub conflict_count: usize,
    /// First few conflicting relative paths, in source walk order
    pub samples: Vec<String>,
    pub source_files: usize,
    pub destination_files: usize,
    pub source_folders: usize,
    pub destination_folders: usize,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        self.conflict_count > 0
    }

    /// Multi-line summary suitable for a decision prompt
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{} file(s) already exist at the destination.\n\
             Source: {} file(s) in {} folder(s)\n\
             Destination: {} file(s) in {} folder(s)",
            self.conflict_count,
            self.source_files,
            self.source_folders,
            self.destination_files,
            self.destination_folders
        );

        if !self.samples.is_empty() {
            text.push_str("\nExamples:");
            for sample in &self.samples {
                text.push_str("\n  ");
                text.push_str(sample);
            }
            if self.conflict_count > self.samples.len() {
                text.push_str(&format!(
                    "\n  ... and {} more",
                    self.conflict_count - self.samples.len()
                ));
            }
        }
        text
    }
}

/// Compare relative file paths under `source` and `target`.
///
/// An absent target means nothing can conflict. Matching ignores case.
pub fn detect_conflicts(source: &Path, target: &Path) -> Result<ConflictReport> {
    if !target.exists() {
        debug!("Target {} does not exist, no conflicts", target.display());
        return Ok(ConflictReport::default());
    }

    let source_tree = list_tree(source)?;
    let target_tree = list_tree(target)?;

    let target_keys: HashSet<String> = target_tree.files.iter().map(|f| fold(f)).collect();

    let mut seen = HashSet::new();
    let mut conflicts = Vec::new();
    for file in &source_tree.files {
        let key = fold(file);
        if target_keys.contains(&key) && seen.insert(key) {
            conflicts.push(file.clone());
        }
    }

    debug!(
        "Conflict scan: {} source files, {} destination files, {} conflicts",
        source_tree.files.len(),
        target_tree.files.len(),
        conflicts.len()
    );

    Ok(ConflictReport {
        conflict_count: conflicts.len(),
        samples: conflicts.into_iter().take(MAX_SAMPLES).collect(),
        source_files: source_tree.files.len(),
        destination_files: target_tree.files.len(),
        source_folders: source_tree.folders,
        destination_folders: target_tree.folders,
    })
}

struct TreeListing {
    files: Vec<String>,
    folders: usize,
}

fn list_tree(root: &Path) -> Result<TreeListing> {
    let mut listing = TreeListing {
        files: Vec::new(),
        folders: 0,
    };

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_dir() {
            listing.folders += 1;
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(entry.file_name()));
        listing.files.push(relative.to_string_lossy().into_owned());
    }

    Ok(listing)
}

fn walk_error(root: &Path, error: walkdir::Error) -> CopyError {
    let path = error.path().unwrap_or(root).to_path_buf();
    match error.into_io_error() {
        Some(io) => classify_read_error(&path, io),
        None => CopyError::unknown(path, "filesystem loop detected"),
    }
}

fn fold(relative: &str) -> String {
    relative.replace('\\', "/").to_lowercase()
}
