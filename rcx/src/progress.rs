//! Progress reporting for tool invocations

use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{CopyError, Result};

/// Which output stream of the tool a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Progress event types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// The tool process was spawned
    Started {
        session_id: Uuid,
        program: PathBuf,
        command_line: String,
        log_path: Option<PathBuf>,
    },
    /// Raw output line, in emission order for its stream
    Output {
        stream: OutputStream,
        line: String,
    },
    /// Completion gauge moved
    Percentage {
        value: f64,
        eta: Option<Duration>,
    },
    /// A file started being processed
    CurrentFile {
        name: String,
        processed: usize,
        total: Option<usize>,
    },
    /// The tool announced how many files it will handle
    TotalFiles {
        total: usize,
    },
    /// Status text changed
    Status {
        text: String,
    },
    /// Warning message
    Warning {
        message: String,
    },
    /// The tool exited or was killed
    Finished {
        exit_code: Option<i32>,
        cancelled: bool,
        duration: Duration,
    },
}

/// Progress channel for receiving progress updates
pub struct ProgressChannel {
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressChannel {
    /// Create a new progress channel
    pub fn new() -> (ProgressReporter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ProgressReporter { sender }, Self { receiver })
    }

    /// Receive the next progress event
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    /// Drain whatever is queued right now
    #[cfg(test)]
    pub(crate) fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Progress reporter for sending progress updates
#[derive(Clone)]
pub struct ProgressReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn started(
        &self,
        session_id: Uuid,
        program: impl Into<PathBuf>,
        command_line: impl Into<String>,
        log_path: Option<PathBuf>,
    ) -> Result<()> {
        self.send(ProgressEvent::Started {
            session_id,
            program: program.into(),
            command_line: command_line.into(),
            log_path,
        })
    }

    pub fn output(&self, stream: OutputStream, line: impl Into<String>) -> Result<()> {
        self.send(ProgressEvent::Output {
            stream,
            line: line.into(),
        })
    }

    pub fn warning(&self, message: impl Into<String>) -> Result<()> {
        self.send(ProgressEvent::Warning {
            message: message.into(),
        })
    }

    pub fn finished(&self, exit_code: Option<i32>, cancelled: bool, duration: Duration) -> Result<()> {
        self.send(ProgressEvent::Finished {
            exit_code,
            cancelled,
            duration,
        })
    }

    /// Send a progress event
    pub fn send(&self, event: ProgressEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| CopyError::Progress("Progress channel disconnected".to_string()))
    }

    /// Whether the receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Remaining-time text: "1h 5m remaining", "3m 12s remaining", "42s remaining"
pub fn format_eta(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if hours > 0 {
        format!("{}h {}m remaining", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s remaining", minutes, seconds)
    } else {
        format!("{}s remaining", seconds)
    }
}
