//! Process orchestration for the external copy tool
//!
//! An [`Orchestrator`] runs one tool invocation at a time. Output lines from both
//! streams are pumped by background tasks into the session; process exit is polled
//! on a fixed interval so a cancellation request can be observed between polls.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::command::{build_command_line, extract_log_path, TOOL_PROGRAM};
use crate::error::{CopyError, Result};
use crate::exit_code::ExitReport;
use crate::progress::{OutputStream, ProgressReporter};
use crate::request::CopyRequest;
use crate::session::ExecutionSession;

/// Interval between process-exit polls
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    Idle,
    Starting,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Program plus the single argument string passed to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub command_line: String,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, command_line: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            command_line: command_line.into(),
        }
    }

    /// The default tool with an already-built argument string
    pub fn robocopy(command_line: impl Into<String>) -> Self {
        Self::new(TOOL_PROGRAM, command_line)
    }

    /// Build the argument string for `request` and pair it with `program`
    pub fn for_request(program: impl Into<PathBuf>, request: &CopyRequest, log_path: Option<&Path>) -> Self {
        Self::new(program, build_command_line(request, log_path))
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        extract_log_path(&self.command_line)
    }
}

/// Invocation that ran until the tool exited
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub exit: ExitReport,
    pub session: ExecutionSession,
    pub duration: Duration,
}

/// Invocation stopped by a cancellation request
#[derive(Debug, Clone)]
pub struct CancelledRun {
    pub session: ExecutionSession,
    pub duration: Duration,
}

/// How an invocation ended; cancellation is an outcome, not an error
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(CompletedRun),
    Cancelled(CancelledRun),
}

impl RunOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled(_))
    }

    pub fn session(&self) -> &ExecutionSession {
        match self {
            RunOutcome::Completed(run) => &run.session,
            RunOutcome::Cancelled(run) => &run.session,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            RunOutcome::Completed(run) => run.duration,
            RunOutcome::Cancelled(run) => run.duration,
        }
    }

    /// Collapse into a result: cancellation and failing exit codes become errors
    pub fn into_result(self) -> Result<CompletedRun> {
        match self {
            RunOutcome::Completed(run) => {
                run.exit.clone().into_result()?;
                Ok(run)
            }
            RunOutcome::Cancelled(_) => Err(CopyError::Cancelled),
        }
    }
}

struct Slot {
    state: OrchestratorState,
    cancel: Option<CancellationToken>,
    last_finish: Option<OrchestratorState>,
}

/// Runs the copy tool, at most one invocation at a time
pub struct Orchestrator {
    slot: Mutex<Slot>,
    poll_interval: Duration,
}

/// Returns the orchestrator to `Idle` however the run ends, including when the
/// run future is dropped
struct RunGuard<'a> {
    orchestrator: &'a Orchestrator,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.orchestrator.slot.lock();
        if !matches!(
            slot.state,
            OrchestratorState::Completed | OrchestratorState::Cancelled | OrchestratorState::Failed
        ) {
            slot.state = OrchestratorState::Failed;
        }
        slot.last_finish = Some(slot.state);
        slot.state = OrchestratorState::Idle;
        slot.cancel = None;
    }
}

enum PumpMessage {
    Line { stream: OutputStream, line: String },
    Failed { stream: OutputStream, error: String },
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_poll_interval(EXIT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: OrchestratorState::Idle,
                cancel: None,
                last_finish: None,
            }),
            poll_interval,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.slot.lock().state
    }

    /// Terminal state of the most recent invocation
    pub fn last_finish(&self) -> Option<OrchestratorState> {
        self.slot.lock().last_finish
    }

    pub fn is_idle(&self) -> bool {
        self.state() == OrchestratorState::Idle
    }

    /// Ask the running invocation to stop. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        let slot = self.slot.lock();
        match &slot.cancel {
            Some(token) => {
                info!("Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Token cancelled when the current invocation is asked to stop
    pub fn cancellation_token(&self) -> Option<CancellationToken> {
        self.slot.lock().cancel.clone()
    }

    fn set_state(&self, state: OrchestratorState) {
        debug!("Orchestrator state -> {:?}", state);
        self.slot.lock().state = state;
    }

    fn begin(&self) -> Result<(CancellationToken, RunGuard<'_>)> {
        let mut slot = self.slot.lock();
        if slot.state != OrchestratorState::Idle {
            return Err(CopyError::Busy);
        }
        let token = CancellationToken::new();
        slot.state = OrchestratorState::Starting;
        slot.cancel = Some(token.clone());
        Ok((token, RunGuard { orchestrator: self }))
    }

    /// Launch the tool and stream its output until it exits or is cancelled
    pub async fn run(&self, invocation: &Invocation, reporter: Option<ProgressReporter>) -> Result<RunOutcome> {
        let (token, _guard) = self.begin()?;
        let mut session = ExecutionSession::new();

        info!(
            "Launching {} {}",
            invocation.program.display(),
            invocation.command_line
        );

        let mut child = match spawn(invocation) {
            Ok(child) => child,
            Err(e) => {
                warn!("{}", e);
                self.set_state(OrchestratorState::Failed);
                return Err(e);
            }
        };
        // kept for tree termination after the child itself has been reaped
        let pid = child.id();
        self.set_state(OrchestratorState::Running);

        emit(&reporter, |r| {
            r.started(
                session.id(),
                invocation.program.clone(),
                invocation.command_line.clone(),
                invocation.log_path(),
            )
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_pump(stdout, OutputStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_pump(stderr, OutputStream::Stderr, tx.clone());
        }
        drop(tx);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let status = loop {
            tokio::select! {
                biased;

                _ = ticker.tick() => {
                    if token.is_cancelled() {
                        return Ok(self.cancelled(&mut child, pid, session, &reporter).await);
                    }
                    match child.try_wait() {
                        Ok(Some(status)) => break status,
                        Ok(None) => {}
                        Err(e) => {
                            terminate(&mut child, pid).await;
                            return Err(self.failed(e.into(), &session, &reporter));
                        }
                    }
                }

                Some(message) = rx.recv() => {
                    if let Err(e) = handle_message(message, &mut session, &reporter) {
                        terminate(&mut child, pid).await;
                        return Err(self.failed(e, &session, &reporter));
                    }
                }
            }
        };

        // lines still buffered in the pipes after exit; a process the tool left
        // running can hold them open, so cancellation stays live here
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    return Ok(self.cancelled(&mut child, pid, session, &reporter).await);
                }

                message = rx.recv() => match message {
                    Some(message) => {
                        if let Err(e) = handle_message(message, &mut session, &reporter) {
                            return Err(self.failed(e, &session, &reporter));
                        }
                    }
                    None => break,
                },
            }
        }

        if token.is_cancelled() {
            return Ok(self.cancelled(&mut child, pid, session, &reporter).await);
        }

        let exit = ExitReport::from_code(status.code());
        if exit.is_success() {
            session.finish();
        }
        let duration = session.elapsed();
        info!("Tool exited after {:?}: {} ({:?})", duration, exit, session.snapshot());

        if !exit.is_success() {
            emit(&reporter, |r| r.warning(exit.description.clone()));
        }
        emit(&reporter, |r| r.finished(exit.code, false, duration));
        self.set_state(OrchestratorState::Completed);

        Ok(RunOutcome::Completed(CompletedRun {
            exit,
            session,
            duration,
        }))
    }

    async fn cancelled(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        session: ExecutionSession,
        reporter: &Option<ProgressReporter>,
    ) -> RunOutcome {
        terminate(child, pid).await;
        let duration = session.elapsed();
        info!("Tool invocation cancelled after {:?}", duration);

        emit(reporter, |r| r.finished(None, true, duration));
        self.set_state(OrchestratorState::Cancelled);
        RunOutcome::Cancelled(CancelledRun { session, duration })
    }

    fn failed(&self, error: CopyError, session: &ExecutionSession, reporter: &Option<ProgressReporter>) -> CopyError {
        warn!("Tool invocation failed: {}", error);
        emit(reporter, |r| r.finished(None, false, session.elapsed()));
        self.set_state(OrchestratorState::Failed);
        error
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn handle_message(
    message: PumpMessage,
    session: &mut ExecutionSession,
    reporter: &Option<ProgressReporter>,
) -> Result<()> {
    match message {
        PumpMessage::Line { stream, line } => {
            trace!("[{}] {}", stream, line);
            match stream {
                OutputStream::Stdout => {
                    let updates = session.observe_stdout(&line);
                    emit(reporter, |r| r.output(stream, line));
                    for update in updates {
                        emit(reporter, |r| r.send(update.into()));
                    }
                }
                OutputStream::Stderr => {
                    session.observe_stderr(&line);
                    debug!("Tool stderr: {}", line);
                    emit(reporter, |r| r.output(stream, line));
                }
            }
            Ok(())
        }
        PumpMessage::Failed { stream, error } => Err(CopyError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("reading tool {} failed: {}", stream, error),
        ))),
    }
}

fn emit<F>(reporter: &Option<ProgressReporter>, send: F)
where
    F: FnOnce(&ProgressReporter) -> Result<()>,
{
    if let Some(reporter) = reporter {
        if send(reporter).is_err() {
            trace!("Progress receiver gone, event dropped");
        }
    }
}

fn spawn_pump<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<PumpMessage>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        // progress updates are terminated by a bare CR, file lines by CRLF or LF
        let codec = AnyDelimiterCodec::new(b"\r\n".to_vec(), b"\n".to_vec());
        let mut frames = FramedRead::new(reader, codec);

        while let Some(frame) = frames.next().await {
            let message = match frame {
                Ok(bytes) if bytes.is_empty() => continue,
                Ok(bytes) => PumpMessage::Line {
                    stream,
                    line: String::from_utf8_lossy(&bytes).into_owned(),
                },
                Err(e) => PumpMessage::Failed {
                    stream,
                    error: e.to_string(),
                },
            };
            let failed = matches!(message, PumpMessage::Failed { .. });
            if tx.send(message).is_err() || failed {
                break;
            }
        }
    });
}

fn spawn(invocation: &Invocation) -> Result<Child> {
    let mut command = std_command(invocation);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut command = tokio::process::Command::from(command);
    command.kill_on_drop(true);
    command
        .spawn()
        .map_err(|e| CopyError::launch_failed(&invocation.program, e.to_string()))
}

#[cfg(windows)]
fn std_command(invocation: &Invocation) -> std::process::Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let mut command = std::process::Command::new(&invocation.program);
    command.raw_arg(&invocation.command_line);
    command.creation_flags(CREATE_NO_WINDOW);
    command
}

#[cfg(unix)]
fn std_command(invocation: &Invocation) -> std::process::Command {
    use std::os::unix::process::CommandExt;

    let mut command = std::process::Command::new(&invocation.program);
    command.args(crate::command::split_command_line(&invocation.command_line));
    // own process group so cancellation can take down the whole tree
    command.process_group(0);
    command
}

#[cfg(not(any(unix, windows)))]
fn std_command(invocation: &Invocation) -> std::process::Command {
    let mut command = std::process::Command::new(&invocation.program);
    command.args(crate::command::split_command_line(&invocation.command_line));
    command
}

/// Forcibly stop the tool and everything it started
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_tree(pid).await;
    }
    if let Err(e) = child.kill().await {
        debug!("Kill after tree termination: {}", e);
    }
}

#[cfg(unix)]
async fn kill_tree(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

#[cfg(windows)]
async fn kill_tree(pid: u32) {
    let result = tokio::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        debug!("taskkill for {} failed: {}", pid, e);
    }
}

#[cfg(not(any(unix, windows)))]
async fn kill_tree(_pid: u32) {}
