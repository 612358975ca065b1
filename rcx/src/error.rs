//! Error types for pre-flight validation and tool execution

use std::path::{Path, PathBuf};

/// Result type alias for rcx operations
pub type Result<T> = std::result::Result<T, CopyError>;

/// Every failure a pre-flight check or a tool invocation can produce
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    /// Blank or unresolvable path
    #[error("Invalid path: {message}")]
    InvalidPath { message: String },

    /// Directory missing or vanished while being probed
    #[error("Path not found: '{path}'")]
    NotFound { path: PathBuf },

    /// Source and destination resolve to the same location
    #[error("Source and destination are the same location: '{path}'")]
    SamePath { path: PathBuf },

    /// Destination lies inside the source tree
    #[error("Destination '{destination_path}' is inside source '{source_path}'; the copy would recurse into itself")]
    NestedPath {
        source_path: PathBuf,
        destination_path: PathBuf,
    },

    /// Source directory cannot be listed
    #[error("No read permission for '{path}'")]
    ReadDenied { path: PathBuf },

    /// Destination directory does not accept new files
    #[error("No write permission for '{path}'")]
    WriteDenied { path: PathBuf },

    /// Destination volume is mounted read-only or write protected
    #[error("Destination volume for '{path}' is read-only")]
    ReadOnlyMedia { path: PathBuf },

    /// Probe failure that is neither access-denied nor not-found
    #[error("Unable to access '{path}': {message}")]
    Unknown { path: PathBuf, message: String },

    /// Volume information could not be queried
    #[error("Drive for '{path}' is not ready: {message}")]
    DriveNotReady { path: PathBuf, message: String },

    /// The external tool could not be started
    #[error("Failed to launch '{program}': {message}")]
    LaunchFailed { program: PathBuf, message: String },

    /// The invocation was cancelled by the caller
    #[error("Operation was cancelled")]
    Cancelled,

    /// Tool exit code 16 or above
    #[error("Copy tool reported a fatal error (exit code {code}): {description}")]
    SubprocessFatal { code: i32, description: String },

    /// Tool exit code with the failure bit set
    #[error("Copy tool reported failures (exit code {code}): {description}")]
    SubprocessPartial { code: i32, description: String },

    /// An invocation is already in flight on the orchestrator
    #[error("Another copy is already running on this orchestrator")]
    Busy,

    /// Option value outside its accepted range
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Progress reporting errors
    #[error("Progress reporting error: {0}")]
    Progress(String),

    /// Hash computation errors
    #[error("Hash computation error for '{path}': {message}")]
    Hash { path: PathBuf, message: String },
}

impl CopyError {
    /// Create a new invalid path error
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::InvalidPath {
            message: message.into(),
        }
    }

    /// Create a new not found error
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a new unknown probe error
    pub fn unknown(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Unknown {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new drive-not-ready error
    pub fn drive_not_ready(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DriveNotReady {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new launch failure
    pub fn launch_failed(program: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::LaunchFailed {
            program: program.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a new hash error
    pub fn hash_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Hash {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Short hint on how the user can fix the condition, when there is one
    pub fn remedy(&self) -> Option<&'static str> {
        match self {
            Self::InvalidPath { .. } => Some("Specify both a source and a destination directory."),
            Self::NotFound { .. } => Some("Check that the directory exists and the drive is connected."),
            Self::SamePath { .. } => Some("Choose a destination different from the source."),
            Self::NestedPath { .. } => Some("Choose a destination outside the source folder."),
            Self::ReadDenied { .. } => {
                Some("Run as administrator, check the folder permissions, or pick a folder you can read.")
            }
            Self::WriteDenied { .. } => {
                Some("Run as administrator, check the folder permissions, or pick a folder you can write to.")
            }
            Self::ReadOnlyMedia { .. } => {
                Some("Optical media cannot be written; check the write-protect switch and the volume properties.")
            }
            Self::DriveNotReady { .. } => Some("Make sure the destination drive is mounted and ready."),
            Self::LaunchFailed { .. } => {
                Some("Check that robocopy is installed and the configured program path is correct.")
            }
            Self::SubprocessPartial { .. } | Self::SubprocessFatal { .. } => {
                Some("Inspect the tool log file for the failing entries.")
            }
            Self::Busy => Some("Wait for the running copy to finish or cancel it."),
            _ => None,
        }
    }
}
