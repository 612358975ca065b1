//! Copy request model: paths, tool options and the conflict choice

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

/// Highest thread count the tool accepts for `/MT`
pub const MAX_THREADS: u32 = 128;

/// How files already present at the destination are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileConflictChoice {
    /// Replace existing files (the tool's default behaviour)
    Overwrite,
    /// Leave every existing file untouched, copy only new ones
    Skip,
    /// Abandon the copy
    Cancel,
}

impl fmt::Display for FileConflictChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileConflictChoice::Overwrite => write!(f, "overwrite"),
            FileConflictChoice::Skip => write!(f, "skip"),
            FileConflictChoice::Cancel => write!(f, "cancel"),
        }
    }
}

impl FromStr for FileConflictChoice {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "skip" => Ok(Self::Skip),
            "cancel" => Ok(Self::Cancel),
            other => Err(CopyError::InvalidOption(format!(
                "unknown conflict choice '{}' (expected overwrite, skip or cancel)",
                other
            ))),
        }
    }
}

/// File properties copied along with the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyAttributes {
    pub data: bool,
    pub attributes: bool,
    pub timestamps: bool,
    pub security: bool,
    pub owner: bool,
    pub audit: bool,
}

impl Default for CopyAttributes {
    fn default() -> Self {
        Self {
            data: true,
            attributes: true,
            timestamps: true,
            security: false,
            owner: false,
            audit: false,
        }
    }
}

impl CopyAttributes {
    /// No attributes selected
    pub fn none() -> Self {
        Self {
            data: false,
            attributes: false,
            timestamps: false,
            security: false,
            owner: false,
            audit: false,
        }
    }

    /// Letter codes in the tool's fixed `DATSOU` order
    pub fn letters(&self) -> String {
        [
            (self.data, 'D'),
            (self.attributes, 'A'),
            (self.timestamps, 'T'),
            (self.security, 'S'),
            (self.owner, 'O'),
            (self.audit, 'U'),
        ]
        .iter()
        .filter(|(selected, _)| *selected)
        .map(|(_, letter)| *letter)
        .collect()
    }

    /// Parse a letter set such as `"DAT"`; order and case do not matter
    pub fn from_letters(letters: &str) -> Result<Self> {
        let mut attributes = Self::none();
        for letter in letters.trim().chars() {
            match letter.to_ascii_uppercase() {
                'D' => attributes.data = true,
                'A' => attributes.attributes = true,
                'T' => attributes.timestamps = true,
                'S' => attributes.security = true,
                'O' => attributes.owner = true,
                'U' => attributes.audit = true,
                other => {
                    return Err(CopyError::InvalidOption(format!(
                        "unknown attribute letter '{}' (expected a subset of DATSOU)",
                        other
                    )))
                }
            }
        }
        Ok(attributes)
    }
}

/// Tool options selected by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyOptions {
    /// Copy subdirectories, including empty ones (`/E`)
    pub recurse: bool,
    /// Make the destination an exact mirror (`/MIR`)
    pub mirror: bool,
    /// Do not overwrite newer destination files with older ones (`/XO`)
    pub exclude_older: bool,
    /// Properties copied with each file (`/COPY:`)
    pub attributes: CopyAttributes,
    /// Worker thread count for `/MT`; `None` copies single-threaded
    pub threads: Option<u32>,
    /// Retries on failed copies (`/R:`)
    pub retry_count: u32,
    /// Seconds between retries (`/W:`)
    pub retry_wait_secs: u32,
    /// Verbose tool output (`/V`)
    pub verbose: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            recurse: false,
            mirror: false,
            exclude_older: false,
            attributes: CopyAttributes::default(),
            threads: Some(8),
            retry_count: 10,
            retry_wait_secs: 5,
            verbose: true,
        }
    }
}

impl CopyOptions {
    /// Check ranges the tool enforces
    pub fn validate(&self) -> Result<()> {
        if let Some(threads) = self.threads {
            if !(1..=MAX_THREADS).contains(&threads) {
                return Err(CopyError::InvalidOption(format!(
                    "thread count {} is outside 1-{}",
                    threads, MAX_THREADS
                )));
            }
        }
        Ok(())
    }

    /// Whether the copy descends into subdirectories
    pub fn walks_subdirectories(&self) -> bool {
        self.recurse || self.mirror
    }
}

/// Logical CPU count clamped to the tool's thread range
pub fn auto_thread_count() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(8)
        .clamp(1, MAX_THREADS)
}

/// One copy to perform; immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyRequest {
    source: PathBuf,
    destination: PathBuf,
    options: CopyOptions,
    conflict_choice: Option<FileConflictChoice>,
}

impl CopyRequest {
    /// Build a request, rejecting blank paths and out-of-range options
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        options: CopyOptions,
    ) -> Result<Self> {
        let source = source.into();
        let destination = destination.into();

        if is_blank(&source) {
            return Err(CopyError::invalid_path("source path is empty"));
        }
        if is_blank(&destination) {
            return Err(CopyError::invalid_path("destination path is empty"));
        }
        options.validate()?;

        Ok(Self {
            source,
            destination,
            options,
            conflict_choice: None,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    pub fn conflict_choice(&self) -> Option<FileConflictChoice> {
        self.conflict_choice
    }

    /// Copy of this request carrying the user's conflict resolution.
    ///
    /// `Overwrite` clears exclude-older so existing files really are replaced.
    pub fn with_conflict_choice(&self, choice: FileConflictChoice) -> Self {
        let mut next = self.clone();
        if choice == FileConflictChoice::Overwrite {
            next.options.exclude_older = false;
        }
        next.conflict_choice = Some(choice);
        next
    }

    /// Copy of this request with no conflict resolution recorded
    pub fn without_conflict_choice(&self) -> Self {
        let mut next = self.clone();
        next.conflict_choice = None;
        next
    }

    /// Whether skip-existing mode is active
    pub fn skips_existing(&self) -> bool {
        self.conflict_choice == Some(FileConflictChoice::Skip)
    }

    /// Name of the source folder, recreated under the destination
    pub fn source_folder_name(&self) -> Option<String> {
        source_folder_name(&self.source)
    }

    /// Directory the tool actually writes into: destination plus source folder name
    pub fn final_destination(&self) -> PathBuf {
        match self.source_folder_name() {
            Some(name) => self.destination.join(name),
            None => self.destination.clone(),
        }
    }
}

/// Last component of a path after trimming trailing separators of either style.
///
/// Drive roots such as `C:\` have no folder name.
pub fn source_folder_name(source: &Path) -> Option<String> {
    let text = source.to_string_lossy();
    let trimmed = text.trim_end_matches(['\\', '/']);
    let name = trimmed.rsplit(['\\', '/']).next()?;
    if name.is_empty() || name.ends_with(':') {
        None
    } else {
        Some(name.to_string())
    }
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().to_string_lossy().trim().is_empty()
}
