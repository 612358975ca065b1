//! Ordered pre-flight pipeline with resumable decision points
//!
//! Blocking checks fail with a [`CopyError`]. Conditions the user may override
//! stop the pipeline with [`PreflightStep::NeedsDecision`]; the caller resumes it
//! through [`Preflight::resolve`].

use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::conflict::{detect_conflicts, ConflictReport};
use crate::disk_space::{self, DiskSpaceAssessment};
use crate::error::{CopyError, Result};
use crate::request::{CopyRequest, FileConflictChoice};
use crate::validator::{self, PathRole, SystemPathGuard, SystemPathWarning};

/// Condition the user may override
#[derive(Debug, Clone, PartialEq)]
pub enum Advisory {
    SystemPath {
        role: PathRole,
        warning: SystemPathWarning,
    },
    FileConflicts(ConflictReport),
    InsufficientSpace(DiskSpaceAssessment),
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::SystemPath { role, warning } => write!(f, "System {} path: {}", role, warning),
            Advisory::FileConflicts(report) => f.write_str(&report.summary()),
            Advisory::InsufficientSpace(assessment) => f.write_str(&assessment.message()),
        }
    }
}

/// Informational finding that never stops the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    DestinationWillBeCreated(PathBuf),
    DiskSpace(DiskSpaceAssessment),
    DiskSpaceUnavailable(String),
    ConflictScanFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::DestinationWillBeCreated(path) => {
                write!(f, "Destination '{}' does not exist and will be created", path.display())
            }
            Notice::DiskSpace(assessment) => f.write_str(&assessment.message()),
            Notice::DiskSpaceUnavailable(reason) => write!(f, "Could not check disk space: {}", reason),
            Notice::ConflictScanFailed(reason) => write!(f, "Could not check existing files: {}", reason),
        }
    }
}

/// Answer to an [`Advisory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Accept the condition; for file conflicts this means overwrite
    Proceed,
    Abort,
    /// Explicit conflict resolution
    Conflict(FileConflictChoice),
}

/// A request that passed every check
#[derive(Debug, Clone)]
pub struct PreparedCopy {
    pub request: CopyRequest,
    pub conflicts: Option<ConflictReport>,
    pub disk_space: Option<DiskSpaceAssessment>,
    pub notices: Vec<Notice>,
}

/// Where the pipeline stopped
#[derive(Debug, Clone)]
pub enum PreflightStep {
    NeedsDecision(Advisory),
    Ready(PreparedCopy),
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    BlockingChecks,
    SourceSystemPath,
    DestinationSystemPath,
    Conflicts,
    DestinationExists,
    DiskSpace,
    Done,
    Aborted,
}

/// Resumable pre-flight run over one request
pub struct Preflight {
    request: CopyRequest,
    guard: SystemPathGuard,
    stage: Stage,
    pending: Option<Advisory>,
    conflicts: Option<ConflictReport>,
    disk_space: Option<DiskSpaceAssessment>,
    notices: Vec<Notice>,
}

impl Preflight {
    /// Start a pipeline; any conflict choice on the request is discarded
    pub fn new(request: &CopyRequest) -> Self {
        Self {
            request: request.without_conflict_choice(),
            guard: SystemPathGuard::from_environment(),
            stage: Stage::BlockingChecks,
            pending: None,
            conflicts: None,
            disk_space: None,
            notices: Vec::new(),
        }
    }

    pub fn with_system_paths(mut self, guard: SystemPathGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn pending(&self) -> Option<&Advisory> {
        self.pending.as_ref()
    }

    /// Run until a decision is needed or the pipeline ends
    pub fn advance(&mut self) -> Result<PreflightStep> {
        if let Some(advisory) = &self.pending {
            return Ok(PreflightStep::NeedsDecision(advisory.clone()));
        }

        loop {
            let advisory = match self.stage {
                Stage::BlockingChecks => {
                    if let Err(e) = self.blocking_checks() {
                        self.stage = Stage::Aborted;
                        return Err(e);
                    }
                    self.stage = Stage::SourceSystemPath;
                    None
                }
                Stage::SourceSystemPath => {
                    self.stage = Stage::DestinationSystemPath;
                    self.system_path_advisory(PathRole::Source)
                }
                Stage::DestinationSystemPath => {
                    self.stage = Stage::Conflicts;
                    self.system_path_advisory(PathRole::Destination)
                }
                Stage::Conflicts => {
                    self.stage = Stage::DestinationExists;
                    self.conflict_advisory()
                }
                Stage::DestinationExists => {
                    if !self.request.destination().exists() {
                        self.notices.push(Notice::DestinationWillBeCreated(
                            self.request.destination().to_path_buf(),
                        ));
                    }
                    self.stage = Stage::DiskSpace;
                    None
                }
                Stage::DiskSpace => {
                    self.stage = Stage::Done;
                    self.disk_space_advisory()
                }
                Stage::Done => return Ok(PreflightStep::Ready(self.prepared())),
                Stage::Aborted => return Ok(PreflightStep::Aborted),
            };

            if let Some(advisory) = advisory {
                debug!("Pre-flight needs a decision: {:?}", advisory);
                self.pending = Some(advisory.clone());
                return Ok(PreflightStep::NeedsDecision(advisory));
            }
        }
    }

    /// Apply the caller's answer to the pending advisory and continue
    pub fn resolve(&mut self, decision: Decision) -> Result<PreflightStep> {
        let advisory = self
            .pending
            .take()
            .ok_or_else(|| CopyError::InvalidOption("no pre-flight decision is pending".to_string()))?;

        let is_conflict = matches!(advisory, Advisory::FileConflicts(_));
        let abort = match decision {
            Decision::Abort => true,
            Decision::Proceed => {
                if is_conflict {
                    self.request = self.request.with_conflict_choice(FileConflictChoice::Overwrite);
                }
                false
            }
            Decision::Conflict(FileConflictChoice::Cancel) if is_conflict => true,
            Decision::Conflict(choice) if is_conflict => {
                self.request = self.request.with_conflict_choice(choice);
                false
            }
            Decision::Conflict(choice) => {
                self.pending = Some(advisory);
                return Err(CopyError::InvalidOption(format!(
                    "conflict choice '{}' does not answer this advisory",
                    choice
                )));
            }
        };

        if abort {
            info!("Pre-flight aborted by user");
            self.stage = Stage::Aborted;
            return Ok(PreflightStep::Aborted);
        }
        self.advance()
    }

    fn blocking_checks(&self) -> Result<()> {
        let source = self.request.source();
        let destination = self.request.destination();

        validator::ensure_present(source, PathRole::Source)?;
        validator::ensure_present(destination, PathRole::Destination)?;
        validator::ensure_source_exists(source)?;
        validator::ensure_different(source, destination)?;
        validator::ensure_not_nested(source, destination)?;
        validator::probe_read(source)?;
        validator::probe_write(destination)?;
        Ok(())
    }

    fn system_path_advisory(&self, role: PathRole) -> Option<Advisory> {
        let path = match role {
            PathRole::Source => self.request.source(),
            PathRole::Destination => self.request.destination(),
        };
        self.guard
            .check(path)
            .map(|warning| Advisory::SystemPath { role, warning })
    }

    fn conflict_advisory(&mut self) -> Option<Advisory> {
        let target = self.request.final_destination();
        if !target.is_dir() {
            return None;
        }

        match detect_conflicts(self.request.source(), &target) {
            Ok(report) => {
                let advisory = report.has_conflicts().then(|| Advisory::FileConflicts(report.clone()));
                self.conflicts = Some(report);
                advisory
            }
            Err(e) => {
                warn!("Conflict scan failed: {}", e);
                self.notices.push(Notice::ConflictScanFailed(e.to_string()));
                None
            }
        }
    }

    fn disk_space_advisory(&mut self) -> Option<Advisory> {
        let recursive = self.request.options().walks_subdirectories();
        match disk_space::assess(self.request.source(), self.request.destination(), recursive) {
            Ok(assessment) => {
                self.disk_space = Some(assessment);
                if assessment.is_sufficient() {
                    self.notices.push(Notice::DiskSpace(assessment));
                    None
                } else {
                    Some(Advisory::InsufficientSpace(assessment))
                }
            }
            Err(e) => {
                warn!("Disk space check failed: {}", e);
                self.notices.push(Notice::DiskSpaceUnavailable(e.to_string()));
                None
            }
        }
    }

    fn prepared(&self) -> PreparedCopy {
        PreparedCopy {
            request: self.request.clone(),
            conflicts: self.conflicts.clone(),
            disk_space: self.disk_space,
            notices: self.notices.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    use crate::request::CopyOptions;

    fn fixture() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("photos");
        let destination = temp.path().join("backup");
        fs::create_dir_all(source.join("2024")).unwrap();
        fs::write(source.join("a.jpg"), "a").unwrap();
        fs::write(source.join("2024").join("b.jpg"), "b").unwrap();
        fs::create_dir_all(&destination).unwrap();
        (temp, source, destination)
    }

    fn preflight(source: &Path, destination: &Path) -> Preflight {
        let options = CopyOptions {
            recurse: true,
            ..Default::default()
        };
        let request = CopyRequest::new(source, destination, options).unwrap();
        Preflight::new(&request).with_system_paths(SystemPathGuard::new(Vec::new()))
    }

    fn expect_ready(step: PreflightStep) -> PreparedCopy {
        match step {
            PreflightStep::Ready(prepared) => prepared,
            other => panic!("Expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_clean_destination_is_ready() {
        let (_temp, source, destination) = fixture();

        let prepared = expect_ready(preflight(&source, &destination).advance().unwrap());

        assert_eq!(prepared.request.conflict_choice(), None);
        assert!(prepared.conflicts.is_none());
        assert!(prepared.disk_space.is_some() || prepared.notices.iter().any(|n| matches!(n, Notice::DiskSpaceUnavailable(_))));
    }

    #[test]
    fn test_missing_source_blocks() {
        let (temp, _source, destination) = fixture();

        let result = preflight(&temp.path().join("nope"), &destination).advance();

        assert!(matches!(result, Err(CopyError::NotFound { .. })));
    }

    #[test]
    fn test_nested_destination_blocks() {
        let (_temp, source, _destination) = fixture();

        let result = preflight(&source, &source.join("2024")).advance();

        assert!(matches!(result, Err(CopyError::NestedPath { .. })));
    }

    #[test]
    fn test_conflicts_need_decision_and_skip_applies() {
        let (_temp, source, destination) = fixture();
        let existing = destination.join("photos");
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("A.JPG"), "old").unwrap();

        let mut pipeline = preflight(&source, &destination);
        let step = pipeline.advance().unwrap();

        match step {
            PreflightStep::NeedsDecision(Advisory::FileConflicts(report)) => {
                assert_eq!(report.conflict_count, 1);
            }
            other => panic!("Expected FileConflicts, got {:?}", other),
        }

        let prepared = expect_ready(
            pipeline
                .resolve(Decision::Conflict(FileConflictChoice::Skip))
                .unwrap(),
        );
        assert_eq!(prepared.request.conflict_choice(), Some(FileConflictChoice::Skip));
        assert!(prepared.conflicts.unwrap().has_conflicts());
    }

    #[test]
    fn test_conflict_cancel_aborts() {
        let (_temp, source, destination) = fixture();
        let existing = destination.join("photos");
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("a.jpg"), "old").unwrap();

        let mut pipeline = preflight(&source, &destination);
        pipeline.advance().unwrap();

        let step = pipeline
            .resolve(Decision::Conflict(FileConflictChoice::Cancel))
            .unwrap();

        assert!(matches!(step, PreflightStep::Aborted));
        assert!(matches!(pipeline.advance().unwrap(), PreflightStep::Aborted));
    }

    #[test]
    fn test_system_path_advisory_then_proceed() {
        let (temp, source, destination) = fixture();
        let mut pipeline = preflight(&source, &destination)
            .with_system_paths(SystemPathGuard::new(vec![temp.path().join("backup")]));

        match pipeline.advance().unwrap() {
            PreflightStep::NeedsDecision(Advisory::SystemPath { role, .. }) => {
                assert_eq!(role, PathRole::Destination);
            }
            other => panic!("Expected SystemPath advisory, got {:?}", other),
        }

        // an unrelated conflict choice leaves the advisory pending
        assert!(pipeline
            .resolve(Decision::Conflict(FileConflictChoice::Skip))
            .is_err());
        assert!(pipeline.pending().is_some());

        expect_ready(pipeline.resolve(Decision::Proceed).unwrap());
    }

    #[test]
    fn test_destination_created_notice() {
        let (temp, source, _destination) = fixture();
        let fresh = temp.path().join("fresh").join("copy");

        let prepared = expect_ready(preflight(&source, &fresh).advance().unwrap());

        assert!(prepared
            .notices
            .iter()
            .any(|n| matches!(n, Notice::DestinationWillBeCreated(p) if p == &fresh)));
    }

    #[test]
    fn test_previous_choice_is_discarded() {
        let (_temp, source, destination) = fixture();
        let request = CopyRequest::new(&source, &destination, CopyOptions::default())
            .unwrap()
            .with_conflict_choice(FileConflictChoice::Skip);

        let mut pipeline = Preflight::new(&request).with_system_paths(SystemPathGuard::new(Vec::new()));
        let prepared = expect_ready(pipeline.advance().unwrap());

        assert_eq!(prepared.request.conflict_choice(), None);
    }

    #[test]
    fn test_resolve_without_pending_decision() {
        let (_temp, source, destination) = fixture();
        let mut pipeline = preflight(&source, &destination);

        assert!(matches!(
            pipeline.resolve(Decision::Proceed),
            Err(CopyError::InvalidOption(_))
        ));
    }
}
