//! Free-space estimation for the destination volume

use std::fmt;
use std::io;
use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CopyError, Result};
use crate::progress::format_bytes;
use crate::validator::nearest_existing_ancestor;

/// Share of the required size reserved on top of it
pub const SAFETY_MARGIN_RATIO: f64 = 0.10;

/// Smallest safety margin, whatever the source size (100 MB)
pub const MIN_SAFETY_MARGIN: u64 = 100 * 1024 * 1024;

/// Sum of file sizes under `path`.
///
/// Entries that cannot be read or vanish during the walk are skipped.
pub fn directory_size(path: &Path, recursive: bool) -> u64 {
    let walker = WalkDir::new(path).min_depth(1);
    let walker = if recursive { walker } else { walker.max_depth(1) };

    let mut total = 0u64;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                log_skipped(error.path().unwrap_or(path), error.io_error());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => total = total.saturating_add(metadata.len()),
            Err(error) => log_skipped(entry.path(), error.io_error()),
        }
    }
    total
}

fn log_skipped(path: &Path, error: Option<&io::Error>) {
    match error.map(io::Error::kind) {
        Some(io::ErrorKind::PermissionDenied) | Some(io::ErrorKind::NotFound) => {
            debug!("Skipping {} while sizing", path.display());
        }
        _ => warn!("Skipping unreadable entry {} while sizing", path.display()),
    }
}

/// Capacity of the volume holding a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSpace {
    pub total: u64,
    pub available: u64,
}

/// Query the volume of `path`, or of its nearest existing ancestor
pub fn volume_space(path: &Path) -> Result<VolumeSpace> {
    let probe = nearest_existing_ancestor(path)
        .ok_or_else(|| CopyError::drive_not_ready(path, "no existing directory on this volume"))?;

    let available =
        fs2::available_space(&probe).map_err(|e| CopyError::drive_not_ready(path, e.to_string()))?;
    let total = fs2::total_space(&probe).map_err(|e| CopyError::drive_not_ready(path, e.to_string()))?;

    Ok(VolumeSpace { total, available })
}

/// Outcome of comparing the source size with free space at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpaceAssessment {
    /// Bytes the copy will write
    pub required: u64,
    /// Extra bytes reserved above `required`
    pub margin: u64,
    /// Free bytes on the destination volume
    pub available: u64,
}

impl DiskSpaceAssessment {
    pub fn new(required: u64, available: u64) -> Self {
        Self {
            required,
            margin: safety_margin(required),
            available,
        }
    }

    pub fn total_required(&self) -> u64 {
        self.required.saturating_add(self.margin)
    }

    pub fn is_sufficient(&self) -> bool {
        self.available >= self.total_required()
    }

    /// Free space left once the copy completes
    pub fn remaining_after_copy(&self) -> u64 {
        self.available.saturating_sub(self.required)
    }

    /// Missing bytes to satisfy the requirement including the margin
    pub fn deficit(&self) -> u64 {
        self.total_required().saturating_sub(self.available)
    }

    pub fn message(&self) -> String {
        if self.is_sufficient() {
            format!(
                "Sufficient disk space.\nRequired: {}\nAvailable: {}\nSafety margin: {}\nRemaining after copy: {}",
                format_bytes(self.required),
                format_bytes(self.available),
                format_bytes(self.margin),
                format_bytes(self.remaining_after_copy())
            )
        } else {
            format!(
                "Insufficient disk space.\nRequired: {} (plus {} safety margin)\nAvailable: {}\nShort by: {}",
                format_bytes(self.required),
                format_bytes(self.margin),
                format_bytes(self.available),
                format_bytes(self.deficit())
            )
        }
    }
}

impl fmt::Display for DiskSpaceAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// max(10% of required, 100 MB)
pub fn safety_margin(required: u64) -> u64 {
    let proportional = (required as f64 * SAFETY_MARGIN_RATIO) as u64;
    proportional.max(MIN_SAFETY_MARGIN)
}

/// Size the source and compare it against the destination volume
pub fn assess(source: &Path, destination: &Path, recursive: bool) -> Result<DiskSpaceAssessment> {
    let required = directory_size(source, recursive);
    let volume = volume_space(destination)?;
    let assessment = DiskSpaceAssessment::new(required, volume.available);

    debug!(
        "Disk space: required {} + margin {}, available {}",
        required, assessment.margin, volume.available
    );
    Ok(assessment)
}
