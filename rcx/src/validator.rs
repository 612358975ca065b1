//! Path checks run before the copy tool is launched
//!
//! Each check is a query over the filesystem. Blocking conditions come back as
//! [`CopyError`] values; system-path collisions are advisories returned as
//! [`SystemPathWarning`] so the caller can decide whether to proceed.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CopyError, Result};

/// Which side of the copy a path belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRole {
    Source,
    Destination,
}

impl fmt::Display for PathRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRole::Source => write!(f, "source"),
            PathRole::Destination => write!(f, "destination"),
        }
    }
}

/// Absolute, separator-trimmed, case-folded form used for path comparisons
pub fn normalize(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let resolved = resolve_dots(&absolute);
    let text = resolved.to_string_lossy();
    let trimmed = text.trim_end_matches(['\\', '/']);
    if trimmed.is_empty() {
        // bare root
        return MAIN_SEPARATOR.to_string();
    }
    trimmed.to_lowercase()
}

/// Fold `.` and `..` lexically; `..` never climbs above the root
fn resolve_dots(path: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(resolved.components().next_back(), Some(Component::Normal(_))) {
                    resolved.pop();
                }
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    resolved
}

/// Fail with `InvalidPath` when the path is blank
pub fn ensure_present(path: &Path, role: PathRole) -> Result<()> {
    if path.as_os_str().to_string_lossy().trim().is_empty() {
        return Err(CopyError::invalid_path(format!("{} path is empty", role)));
    }
    Ok(())
}

/// Fail with `SamePath` when both paths resolve to one location
pub fn ensure_different(source: &Path, destination: &Path) -> Result<()> {
    if normalize(source) == normalize(destination) {
        return Err(CopyError::SamePath {
            path: source.to_path_buf(),
        });
    }
    Ok(())
}

/// Fail with `NestedPath` when the destination lies strictly inside the source
pub fn ensure_not_nested(source: &Path, destination: &Path) -> Result<()> {
    if is_nested(&normalize(source), &normalize(destination)) {
        return Err(CopyError::NestedPath {
            source_path: source.to_path_buf(),
            destination_path: destination.to_path_buf(),
        });
    }
    Ok(())
}

fn is_nested(source: &str, destination: &str) -> bool {
    let source_prefix = with_trailing_separator(source);
    let destination = with_trailing_separator(destination);
    destination != source_prefix && destination.starts_with(&source_prefix)
}

fn with_trailing_separator(path: &str) -> String {
    if path.ends_with(['\\', '/']) {
        path.to_string()
    } else {
        format!("{}{}", path, MAIN_SEPARATOR)
    }
}

/// Fail with `NotFound` unless the source is an existing directory
pub fn ensure_source_exists(source: &Path) -> Result<()> {
    if source.is_dir() {
        Ok(())
    } else {
        Err(CopyError::not_found(source))
    }
}

/// List the top level of `path` to confirm it can be read
pub fn probe_read(path: &Path) -> Result<()> {
    debug!("Probing read access on {}", path.display());

    let entries = fs::read_dir(path).map_err(|e| classify_read_error(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| classify_read_error(path, e))?;
        // file types come from the directory listing itself on most platforms
        entry.file_type().map_err(|e| classify_read_error(path, e))?;
    }
    Ok(())
}

/// Map a listing failure onto the error taxonomy
pub fn classify_read_error(path: &Path, error: io::Error) -> CopyError {
    match error.kind() {
        io::ErrorKind::PermissionDenied => CopyError::ReadDenied {
            path: path.to_path_buf(),
        },
        io::ErrorKind::NotFound => CopyError::not_found(path),
        _ => CopyError::unknown(path, error.to_string()),
    }
}

/// Write and remove a uniquely named marker file in the destination.
///
/// When the destination does not exist yet, its nearest existing ancestor is probed.
pub fn probe_write(destination: &Path) -> Result<()> {
    let directory = nearest_existing_ancestor(destination)
        .ok_or_else(|| CopyError::not_found(destination))?;
    let marker = directory.join(format!(".rcx_write_test_{}.tmp", Uuid::new_v4()));
    debug!("Probing write access with {}", marker.display());

    let written = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)
        .and_then(|mut file| file.write_all(b"test"));
    if let Err(error) = written {
        let _ = fs::remove_file(&marker);
        return Err(classify_write_error(&directory, error));
    }

    fs::remove_file(&marker).map_err(|e| classify_write_error(&directory, e))
}

/// Closest ancestor of `path` (itself included) that exists as a directory
pub fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    let absolute = std::path::absolute(path).ok()?;
    absolute
        .ancestors()
        .find(|candidate| candidate.is_dir())
        .map(Path::to_path_buf)
}

/// Map a marker-file failure onto the error taxonomy
pub fn classify_write_error(path: &Path, error: io::Error) -> CopyError {
    if is_read_only_media(&error) {
        return CopyError::ReadOnlyMedia {
            path: path.to_path_buf(),
        };
    }
    match error.kind() {
        io::ErrorKind::PermissionDenied => CopyError::WriteDenied {
            path: path.to_path_buf(),
        },
        io::ErrorKind::NotFound => CopyError::not_found(path),
        _ => CopyError::unknown(path, error.to_string()),
    }
}

fn is_read_only_media(error: &io::Error) -> bool {
    // EROFS on unix, ERROR_WRITE_PROTECT on windows
    const READ_ONLY_CODE: i32 = if cfg!(windows) { 19 } else { 30 };
    error.raw_os_error() == Some(READ_ONLY_CODE)
        || error.to_string().to_lowercase().contains("read-only")
}

/// Non-fatal advisory: the path is, or lies under, an OS-reserved directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPathWarning {
    pub path: PathBuf,
    pub reserved: PathBuf,
}

impl fmt::Display for SystemPathWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is inside the system directory '{}'; copying here may affect system stability",
            self.path.display(),
            self.reserved.display()
        )
    }
}

/// Set of OS-reserved directories a copy should not touch without confirmation
#[derive(Debug, Clone)]
pub struct SystemPathGuard {
    reserved: Vec<PathBuf>,
}

impl SystemPathGuard {
    pub fn new(reserved: Vec<PathBuf>) -> Self {
        let mut reserved: Vec<PathBuf> = reserved
            .into_iter()
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        reserved.sort();
        reserved.dedup();
        Self { reserved }
    }

    /// Reserved directories for the running platform, including environment-provided
    /// special folders
    pub fn from_environment() -> Self {
        Self::new(platform_reserved_dirs())
    }

    pub fn reserved(&self) -> &[PathBuf] {
        &self.reserved
    }

    /// Warning when `path` equals or lies under a reserved directory
    pub fn check(&self, path: &Path) -> Option<SystemPathWarning> {
        let candidate = normalize(path);
        self.reserved
            .iter()
            .find(|reserved| {
                let reserved_norm = normalize(reserved);
                candidate == reserved_norm
                    || candidate.starts_with(&with_trailing_separator(&reserved_norm))
            })
            .map(|reserved| SystemPathWarning {
                path: path.to_path_buf(),
                reserved: reserved.clone(),
            })
    }
}

impl Default for SystemPathGuard {
    fn default() -> Self {
        Self::from_environment()
    }
}

#[cfg(windows)]
fn platform_reserved_dirs() -> Vec<PathBuf> {
    use std::env;

    let mut dirs: Vec<PathBuf> = ["C:\\Windows", "C:\\Program Files", "C:\\Program Files (x86)"]
        .iter()
        .map(PathBuf::from)
        .collect();

    for var in ["SystemRoot", "windir", "ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"] {
        if let Some(value) = env::var_os(var) {
            dirs.push(PathBuf::from(value));
        }
    }
    if let Some(root) = env::var_os("SystemRoot") {
        dirs.push(PathBuf::from(root).join("System32"));
    }
    dirs
}

#[cfg(not(windows))]
fn platform_reserved_dirs() -> Vec<PathBuf> {
    [
        "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/proc", "/sbin", "/sys", "/usr",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_blank_path_is_invalid() {
        assert!(matches!(
            ensure_present(Path::new("   "), PathRole::Source),
            Err(CopyError::InvalidPath { .. })
        ));
        assert!(ensure_present(Path::new("/data"), PathRole::Source).is_ok());
    }

    #[test]
    fn test_same_path_ignores_case_and_trailing_separator() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("Data");
        let upper = PathBuf::from(format!("{}{}", base.display().to_string().to_uppercase(), MAIN_SEPARATOR));

        assert!(matches!(
            ensure_different(&base, &upper),
            Err(CopyError::SamePath { .. })
        ));
    }

    #[test]
    fn test_parent_segments_are_resolved() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a");
        let back_to_source = temp.path().join("a").join("..").join("a");
        let sibling = temp.path().join("a").join("..").join("b");
        let dotted = temp.path().join(".").join("a").join("sub").join("..");

        assert!(matches!(
            ensure_different(&back_to_source, &source),
            Err(CopyError::SamePath { .. })
        ));
        assert!(matches!(
            ensure_different(&dotted, &source),
            Err(CopyError::SamePath { .. })
        ));
        assert!(ensure_not_nested(&source, &sibling).is_ok());
        assert!(matches!(
            ensure_not_nested(&source, &sibling.join("..").join("a").join("inner")),
            Err(CopyError::NestedPath { .. })
        ));
    }

    #[test]
    fn test_parent_segment_stops_at_root() {
        let root = PathBuf::from(MAIN_SEPARATOR.to_string());

        assert_eq!(resolve_dots(&root.join("..").join("..")), root);
    }

    #[test]
    fn test_nested_destination_rejected() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("data");
        let inside = source.join("backup");

        assert!(matches!(
            ensure_not_nested(&source, &inside),
            Err(CopyError::NestedPath { .. })
        ));
    }

    #[test]
    fn test_sibling_with_common_prefix_is_not_nested() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("data");
        let sibling = temp.path().join("data-backup");

        assert!(ensure_not_nested(&source, &sibling).is_ok());
        // ancestor of the source is fine too
        assert!(ensure_not_nested(&source, temp.path()).is_ok());
    }

    #[test]
    fn test_missing_source_not_found() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("gone");

        assert!(matches!(ensure_source_exists(&missing), Err(CopyError::NotFound { .. })));
        assert!(matches!(probe_read(&missing), Err(CopyError::NotFound { .. })));
    }

    #[test]
    fn test_read_probe_on_populated_directory() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();

        assert!(probe_read(temp.path()).is_ok());
    }

    #[test]
    fn test_write_probe_leaves_no_marker() {
        let temp = TempDir::new().unwrap();

        probe_write(temp.path()).unwrap();

        let leftovers: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_probe_uses_existing_ancestor() {
        let temp = TempDir::new().unwrap();
        let not_yet = temp.path().join("new").join("deeper");

        assert_eq!(nearest_existing_ancestor(&not_yet).unwrap(), temp.path());
        assert!(probe_write(&not_yet).is_ok());
    }

    #[test]
    fn test_classify_errors() {
        let path = Path::new("/x");
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(classify_read_error(path, denied), CopyError::ReadDenied { .. }));

        let read_only = io::Error::new(io::ErrorKind::Other, "The media is Read-Only");
        assert!(matches!(classify_write_error(path, read_only), CopyError::ReadOnlyMedia { .. }));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(classify_write_error(path, denied), CopyError::WriteDenied { .. }));

        let other = io::Error::new(io::ErrorKind::Other, "device busy");
        assert!(matches!(classify_read_error(path, other), CopyError::Unknown { .. }));
    }

    #[test]
    fn test_system_path_guard_prefix_match() {
        let temp = TempDir::new().unwrap();
        let reserved = temp.path().join("Windows");
        let guard = SystemPathGuard::new(vec![reserved.clone()]);

        let warning = guard.check(&reserved.join("System32")).unwrap();
        assert_eq!(warning.reserved, reserved);
        assert!(guard.check(&reserved).is_some());
        assert!(guard.check(&temp.path().join("WindowsApps")).is_none());
        assert!(guard.check(&temp.path().join("docs")).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_default_guard_flags_etc() {
        let guard = SystemPathGuard::from_environment();
        assert!(guard.check(Path::new("/etc/ssh")).is_some());
        assert!(guard.check(Path::new("/home")).is_none());
    }
}
