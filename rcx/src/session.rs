//! Per-invocation execution state

use std::fmt;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::parser::{parse_line, ParsedLine};
use crate::progress::{format_eta, ProgressEvent};

/// Longest file name shown before it is shortened
pub const MAX_DISPLAY_NAME: usize = 50;

/// Status text of a running session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionStatus {
    Preparing,
    Copying { file: String },
    Transferring { eta: Duration },
    Finished,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Preparing => write!(f, "Preparing"),
            SessionStatus::Copying { file } => write!(f, "Copying: {}", file),
            SessionStatus::Transferring { eta } => f.write_str(&format_eta(*eta)),
            SessionStatus::Finished => write!(f, "Operation complete"),
        }
    }
}

/// Observable change produced by one output line
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Percentage { value: f64, eta: Option<Duration> },
    CurrentFile { name: String, processed: usize, total: Option<usize> },
    TotalFiles(usize),
    Status(String),
}

/// Counters, gauge and status for one tool invocation.
///
/// Created when the invocation starts and handed back to the caller when it ends.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    id: Uuid,
    started: Instant,
    processed: usize,
    total: Option<usize>,
    percentage: f64,
    status: SessionStatus,
    stderr_lines: usize,
}

impl ExecutionSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            processed: 0,
            total: None,
            percentage: 0.0,
            status: SessionStatus::Preparing,
            stderr_lines: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn stderr_lines(&self) -> usize {
        self.stderr_lines
    }

    /// Apply a stdout line using the real elapsed time
    pub fn observe_stdout(&mut self, line: &str) -> Vec<SessionUpdate> {
        let elapsed = self.elapsed();
        self.observe_stdout_at(line, elapsed)
    }

    /// Apply a stdout line as if `elapsed` had passed since the start
    pub fn observe_stdout_at(&mut self, line: &str, elapsed: Duration) -> Vec<SessionUpdate> {
        let parsed = parse_line(line);
        self.apply(parsed, elapsed)
    }

    pub fn observe_stderr(&mut self, _line: &str) {
        self.stderr_lines += 1;
    }

    /// Mark the gauge complete once the tool has exited successfully
    pub fn finish(&mut self) {
        self.percentage = 100.0;
        self.status = SessionStatus::Finished;
    }

    fn apply(&mut self, parsed: ParsedLine, elapsed: Duration) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();

        if let Some(raw) = parsed.percentage {
            let value = raw.clamp(0.0, 100.0);
            self.percentage = value;
            let eta = estimate_remaining(elapsed, value);
            updates.push(SessionUpdate::Percentage { value, eta });

            if value >= 100.0 {
                self.status = SessionStatus::Finished;
                updates.push(SessionUpdate::Status(self.status.to_string()));
            } else if let Some(eta) = eta {
                // a displayed file name keeps priority over the estimate
                if !matches!(self.status, SessionStatus::Copying { .. }) {
                    self.status = SessionStatus::Transferring { eta };
                    updates.push(SessionUpdate::Status(self.status.to_string()));
                }
            }
        }

        if let Some(found) = parsed.current_file {
            self.processed += 1;
            let name = shorten_name(&found.name);
            self.status = SessionStatus::Copying { file: name.clone() };
            // the file update carries the status text along with its counter
            updates.push(SessionUpdate::CurrentFile {
                name,
                processed: self.processed,
                total: self.total,
            });
        }

        if let Some(total) = parsed.total_files {
            if self.total.is_none() && total > 0 {
                self.total = Some(total);
                updates.push(SessionUpdate::TotalFiles(total));
            }
        }

        updates
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            files_processed: self.processed,
            files_total: self.total,
            percentage: self.percentage,
            status: self.status.to_string(),
            elapsed_time: self.elapsed(),
            stderr_lines: self.stderr_lines,
        }
    }
}

impl Default for ExecutionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl From<SessionUpdate> for ProgressEvent {
    fn from(update: SessionUpdate) -> Self {
        match update {
            SessionUpdate::Percentage { value, eta } => ProgressEvent::Percentage { value, eta },
            SessionUpdate::CurrentFile { name, processed, total } => {
                ProgressEvent::CurrentFile { name, processed, total }
            }
            SessionUpdate::TotalFiles(total) => ProgressEvent::TotalFiles { total },
            SessionUpdate::Status(text) => ProgressEvent::Status { text },
        }
    }
}

/// Snapshot of a session's counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub files_processed: usize,
    pub files_total: Option<usize>,
    pub percentage: f64,
    pub status: String,
    pub elapsed_time: Duration,
    pub stderr_lines: usize,
}

/// Linear projection: elapsed / fraction - elapsed
pub fn estimate_remaining(elapsed: Duration, percentage: f64) -> Option<Duration> {
    if percentage <= 0.0 || percentage >= 100.0 {
        return None;
    }
    let elapsed_secs = elapsed.as_secs_f64();
    let remaining = elapsed_secs / (percentage / 100.0) - elapsed_secs;
    if remaining > 0.0 && remaining.is_finite() {
        Some(Duration::from_secs_f64(remaining))
    } else {
        None
    }
}

/// `"..."` plus the last 47 characters for names longer than 50 characters
pub fn shorten_name(name: &str) -> String {
    let count = name.chars().count();
    if count <= MAX_DISPLAY_NAME {
        return name.to_string();
    }
    let keep = MAX_DISPLAY_NAME - 3;
    let tail: String = name.chars().skip(count - keep).collect();
    format!("...{}", tail)
}
