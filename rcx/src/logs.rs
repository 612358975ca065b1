//! Per-invocation tool log files

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Local};
use tracing::{debug, warn};

/// Directory name created beside the running executable
pub const LOG_DIR_NAME: &str = "logs";

/// Where tool log files are written
#[derive(Debug, Clone)]
pub struct LogDirectory {
    dir: Option<PathBuf>,
}

impl LogDirectory {
    /// `logs` next to the current executable
    pub fn beside_executable() -> Self {
        let dir = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|parent| parent.join(LOG_DIR_NAME)));
        if dir.is_none() {
            warn!("Cannot locate the running executable; tool logging disabled");
        }
        Self { dir }
    }

    /// An explicitly configured directory
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Tool logging switched off
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Fresh timestamped log path, creating the directory on first use.
    ///
    /// Returns `None` when the directory cannot be created.
    pub fn next_log_path(&self) -> Option<PathBuf> {
        self.log_path_at(Local::now())
    }

    pub fn log_path_at(&self, now: DateTime<Local>) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("Cannot create log directory {}: {}; tool logging disabled", dir.display(), e);
            return None;
        }
        let path = dir.join(log_file_name(now));
        debug!("Tool log file: {}", path.display());
        Some(path)
    }
}

impl Default for LogDirectory {
    fn default() -> Self {
        Self::beside_executable()
    }
}

/// `robocopy_log_<yyyyMMdd_HHmmss>.txt`
pub fn log_file_name(now: DateTime<Local>) -> String {
    format!("robocopy_log_{}.txt", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_log_file_name_format() {
        let when = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(log_file_name(when), "robocopy_log_20240307_090502.txt");
    }

    #[test]
    fn test_directory_created_on_first_use() {
        let temp = TempDir::new().unwrap();
        let logs = LogDirectory::at(temp.path().join("nested").join("logs"));

        let path = logs.next_log_path().unwrap();

        assert!(path.parent().unwrap().is_dir());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("robocopy_log_"));
    }

    #[test]
    fn test_uncreatable_directory_disables_logging() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();

        let logs = LogDirectory::at(blocker.join("logs"));

        assert!(logs.next_log_path().is_none());
        assert!(LogDirectory::disabled().next_log_path().is_none());
    }
}
