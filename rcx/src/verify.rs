//! Post-copy integrity verification by content hash

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use walkdir::WalkDir;

use crate::error::{CopyError, Result};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Hash algorithms supported for verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    #[default]
    Sha256,
    Sha384,
    Sha512,
    /// Blake3 hash (faster)
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Md5 => write!(f, "MD5"),
            HashAlgorithm::Sha1 => write!(f, "SHA-1"),
            HashAlgorithm::Sha256 => write!(f, "SHA-256"),
            HashAlgorithm::Sha384 => write!(f, "SHA-384"),
            HashAlgorithm::Sha512 => write!(f, "SHA-512"),
            HashAlgorithm::Blake3 => write!(f, "BLAKE3"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(CopyError::InvalidOption(format!(
                "unsupported hash algorithm '{}' (expected md5, sha1, sha256, sha384, sha512 or blake3)",
                s
            ))),
        }
    }
}

enum StreamHasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl StreamHasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => StreamHasher::Md5(Md5::new()),
            HashAlgorithm::Sha1 => StreamHasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => StreamHasher::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => StreamHasher::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Md5(h) => h.update(data),
            StreamHasher::Sha1(h) => h.update(data),
            StreamHasher::Sha256(h) => h.update(data),
            StreamHasher::Sha384(h) => h.update(data),
            StreamHasher::Sha512(h) => h.update(data),
            StreamHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            StreamHasher::Md5(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha1(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha256(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha384(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha512(h) => format!("{:x}", h.finalize()),
            StreamHasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Lowercase hex digest of a file's contents
pub async fn compute_file_hash(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| CopyError::hash_error(path, format!("Failed to open file: {}", e)))?;

    let mut hasher = StreamHasher::new(algorithm);
    let mut buffer = vec![0; 8192];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .await
            .map_err(|e| CopyError::hash_error(path, format!("Failed to read file: {}", e)))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize_hex())
}

/// Result of comparing one file pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Valid,
    Invalid,
    Missing,
}

/// Compare a source file with its copy
pub async fn verify_file(source: &Path, destination: &Path, algorithm: HashAlgorithm) -> Result<FileStatus> {
    match fs::try_exists(destination).await {
        Ok(true) => {}
        Ok(false) => return Ok(FileStatus::Missing),
        Err(e) => {
            return Err(CopyError::hash_error(
                destination,
                format!("Failed to check file: {}", e),
            ))
        }
    }

    let expected = compute_file_hash(source, algorithm).await?;
    let actual = compute_file_hash(destination, algorithm).await?;

    if expected == actual {
        Ok(FileStatus::Valid)
    } else {
        debug!("Hash mismatch for {}", destination.display());
        Ok(FileStatus::Invalid)
    }
}

/// Why a file failed verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    Mismatch,
    Missing,
    Error(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Mismatch => write!(f, "content differs"),
            FailureReason::Missing => write!(f, "missing at destination"),
            FailureReason::Error(message) => write!(f, "error: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub relative_path: String,
    pub reason: FailureReason,
}

/// Totals for a tree verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub algorithm: HashAlgorithm,
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub missing: usize,
    pub errors: usize,
    pub failed: Vec<FailedFile>,
}

impl VerificationReport {
    fn new(algorithm: HashAlgorithm, total: usize) -> Self {
        Self {
            algorithm,
            total,
            valid: 0,
            invalid: 0,
            missing: 0,
            errors: 0,
            failed: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.valid == self.total
    }

    pub fn summary(&self) -> String {
        format!(
            "Verified {} file(s) with {}: {} valid, {} invalid, {} missing, {} error(s)",
            self.total, self.algorithm, self.valid, self.invalid, self.missing, self.errors
        )
    }

    fn record(&mut self, relative_path: String, outcome: Result<FileStatus>) {
        let reason = match outcome {
            Ok(FileStatus::Valid) => {
                self.valid += 1;
                return;
            }
            Ok(FileStatus::Invalid) => {
                self.invalid += 1;
                FailureReason::Mismatch
            }
            Ok(FileStatus::Missing) => {
                self.missing += 1;
                FailureReason::Missing
            }
            Err(e) => {
                self.errors += 1;
                FailureReason::Error(e.to_string())
            }
        };
        self.failed.push(FailedFile { relative_path, reason });
    }
}

/// Compare every source file with the file at the same relative path in `destination`
pub async fn verify_tree(
    source: &Path,
    destination: &Path,
    algorithm: HashAlgorithm,
    recursive: bool,
    cancel: &CancellationToken,
    reporter: Option<&ProgressReporter>,
) -> Result<VerificationReport> {
    let files = list_files(source, recursive)?;
    let mut report = VerificationReport::new(algorithm, files.len());
    info!(
        "Verifying {} file(s) from {} against {} with {}",
        files.len(),
        source.display(),
        destination.display(),
        algorithm
    );

    for (index, relative) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("Verification cancelled after {} file(s)", index);
            return Err(CopyError::Cancelled);
        }

        let label = relative.to_string_lossy().into_owned();
        if let Some(reporter) = reporter {
            let event = ProgressEvent::CurrentFile {
                name: label.clone(),
                processed: index + 1,
                total: Some(files.len()),
            };
            if reporter.send(event).is_err() {
                trace!("Progress receiver gone, event dropped");
            }
        }

        let outcome = verify_file(&source.join(relative), &destination.join(relative), algorithm).await;
        report.record(label, outcome);
    }

    info!("{}", report.summary());
    Ok(report)
}

fn list_files(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root).min_depth(1).sort_by_file_name();
    let walker = if recursive { walker } else { walker.max_depth(1) };

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => CopyError::Io(io),
            None => CopyError::unknown(root, "filesystem loop detected"),
        })?;
        if entry.file_type().is_file() {
            if let Ok(relative) = entry.path().strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as std_fs;
    use tempfile::TempDir;
    use test_case::test_case;

    fn mirror_fixture() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        let destination = temp.path().join("dst");
        for root in [&source, &destination] {
            std_fs::create_dir_all(root.join("sub")).unwrap();
            std_fs::write(root.join("a.txt"), "alpha").unwrap();
            std_fs::write(root.join("sub").join("b.txt"), "beta").unwrap();
        }
        (temp, source, destination)
    }

    #[tokio::test]
    async fn test_known_sha256_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("abc.txt");
        std_fs::write(&path, "abc").unwrap();

        let digest = compute_file_hash(&path, HashAlgorithm::Sha256).await.unwrap();

        assert_eq!(digest, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test_case(HashAlgorithm::Md5, 32)]
    #[test_case(HashAlgorithm::Sha1, 40)]
    #[test_case(HashAlgorithm::Sha256, 64)]
    #[test_case(HashAlgorithm::Sha384, 96)]
    #[test_case(HashAlgorithm::Sha512, 128)]
    #[test_case(HashAlgorithm::Blake3, 64)]
    #[tokio::test]
    async fn test_digest_lengths(algorithm: HashAlgorithm, hex_len: usize) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        std_fs::write(&path, vec![7u8; 20_000]).unwrap();

        let digest = compute_file_hash(&path, algorithm).await.unwrap();

        assert_eq!(digest.len(), hex_len);
    }

    #[tokio::test]
    async fn test_identical_trees_verify_clean() {
        let (_temp, source, destination) = mirror_fixture();

        let report = verify_tree(&source, &destination, HashAlgorithm::Blake3, true, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(report.total, 2);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_mismatch_and_missing_reported() {
        let (_temp, source, destination) = mirror_fixture();
        std_fs::write(destination.join("a.txt"), "changed").unwrap();
        std_fs::remove_file(destination.join("sub").join("b.txt")).unwrap();

        let report = verify_tree(&source, &destination, HashAlgorithm::Sha256, true, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(report.valid, 0);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.missing, 1);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].reason, FailureReason::Mismatch);
        assert!(report.summary().contains("1 invalid, 1 missing"));
    }

    #[tokio::test]
    async fn test_non_recursive_only_top_level() {
        let (_temp, source, destination) = mirror_fixture();

        let report = verify_tree(&source, &destination, HashAlgorithm::Sha512, false, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(report.total, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_temp, source, destination) = mirror_fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = verify_tree(&source, &destination, HashAlgorithm::Sha256, true, &cancel, None).await;

        assert!(matches!(result, Err(CopyError::Cancelled)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_destination_counts_as_error() {
        let (_temp, source, destination) = mirror_fixture();
        std_fs::remove_dir_all(destination.join("sub")).unwrap();
        std_fs::write(destination.join("sub"), "not a directory").unwrap();

        let outcome = verify_file(
            &source.join("sub").join("b.txt"),
            &destination.join("sub").join("b.txt"),
            HashAlgorithm::Sha256,
        )
        .await;
        assert!(matches!(outcome, Err(CopyError::Hash { .. })));

        let report = verify_tree(&source, &destination, HashAlgorithm::Sha256, true, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.missing, 0);
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("blake3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        assert_eq!("MD5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("sha-1".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha1);
        assert_eq!(HashAlgorithm::default(), HashAlgorithm::Sha256);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }
}
