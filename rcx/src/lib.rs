//! rcx: a safety layer around the robocopy utility
//!
//! Provides:
//! - Pre-flight path validation and permission probing
//! - Conflict detection against an existing destination subtree
//! - Disk space estimation with a safety margin
//! - Command-line construction for the external tool
//! - Process orchestration with streaming output parsing and cancellation
//! - Post-copy hash verification

pub mod error;
pub mod request;
pub mod validator;
pub mod conflict;
pub mod disk_space;
pub mod command;
pub mod logs;
pub mod parser;
pub mod session;
pub mod progress;
pub mod exit_code;
pub mod orchestrator;
pub mod preflight;
pub mod verify;

// Re-export main types and functions
pub use error::{CopyError, Result};
pub use request::{CopyAttributes, CopyOptions, CopyRequest, FileConflictChoice};
pub use validator::{PathRole, SystemPathGuard, SystemPathWarning};
pub use conflict::{detect_conflicts, ConflictReport};
pub use disk_space::DiskSpaceAssessment;
pub use command::{build_command_line, TOOL_PROGRAM};
pub use logs::LogDirectory;
pub use parser::{parse_line, MatcherKind, ParsedLine};
pub use session::{ExecutionSession, SessionStatus};
pub use progress::{OutputStream, ProgressChannel, ProgressEvent, ProgressReporter};
pub use exit_code::{ExitClass, ExitReport};
pub use orchestrator::{Invocation, Orchestrator, OrchestratorState, RunOutcome};
pub use preflight::{Advisory, Decision, Notice, Preflight, PreflightStep, PreparedCopy};
pub use verify::{HashAlgorithm, VerificationReport};

/// Command line the tool would receive for `request`, with a fresh log path from `logs`
pub fn preview_command(request: &CopyRequest, logs: &LogDirectory) -> String {
    let log_path = logs.next_log_path();
    build_command_line(request, log_path.as_deref())
}

/// Run a prepared copy through `orchestrator`, logging to `log_path` when given
pub async fn execute(
    orchestrator: &Orchestrator,
    program: impl Into<std::path::PathBuf>,
    prepared: &PreparedCopy,
    log_path: Option<&std::path::Path>,
    reporter: Option<ProgressReporter>,
) -> Result<RunOutcome> {
    if log_path.is_none() {
        if let Some(reporter) = &reporter {
            if reporter.warning("No log file will be written for this copy").is_err() {
                tracing::trace!("Progress receiver gone, warning dropped");
            }
        }
    }
    let invocation = Invocation::for_request(program, &prepared.request, log_path);
    orchestrator.run(&invocation, reporter).await
}

#[cfg(test)]
mod parser_tests;
