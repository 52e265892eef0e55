//! Backend process execution with streamed output.

use super::CommandSpec;
use crate::cancellation::CancellationToken;
use crate::core::{ExitOutcome, OutputStream, RawOutputLine};
use crate::errors::LaunchError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lines buffered between the pipe readers and the consumer.
const LINE_BUFFER: usize = 1024;

/// Launches backend processes.
///
/// Implementations must deliver output lines in the order they were read and
/// must yield [`ExitOutcome::Cancelled`] (or [`ExitOutcome::TimedOut`]) once
/// `cancel` trips, after the process has been terminated.
#[async_trait]
pub trait ProcessRunner: Send + Sync + Debug {
    /// Starts `command` and returns its output sequence.
    async fn execute(
        &self,
        command: &CommandSpec,
        cancel: Arc<CancellationToken>,
    ) -> Result<ProcessExecution, LaunchError>;
}

/// A running backend process: a finite, single-consumer sequence of output
/// lines followed by a final [`ExitOutcome`].
#[derive(Debug)]
pub struct ProcessExecution {
    lines: mpsc::Receiver<RawOutputLine>,
    outcome: oneshot::Receiver<ExitOutcome>,
}

impl ProcessExecution {
    /// Creates an execution from its line and outcome channels.
    ///
    /// The outcome must only be sent once every line sender has been dropped.
    #[must_use]
    pub fn new(lines: mpsc::Receiver<RawOutputLine>, outcome: oneshot::Receiver<ExitOutcome>) -> Self {
        Self { lines, outcome }
    }

    /// Returns the next output line, or `None` once the output is exhausted.
    pub async fn next_line(&mut self) -> Option<RawOutputLine> {
        self.lines.recv().await
    }

    /// Drains any remaining lines and waits for the exit outcome.
    pub async fn finish(mut self) -> (Vec<RawOutputLine>, ExitOutcome) {
        let mut rest = Vec::new();
        while let Some(line) = self.lines.recv().await {
            rest.push(line);
        }
        // A dropped supervisor means the process was reaped without a status.
        let outcome = self.outcome.await.unwrap_or(ExitOutcome::Exited { code: None });
        (rest, outcome)
    }
}

/// Runs backend processes with `tokio::process`.
#[derive(Debug, Clone)]
pub struct TokioProcessRunner {
    /// How long a process may take to exit after SIGTERM before it is killed.
    grace_period: Duration,
    /// How long to wait for pipes to close after the process exited.
    drain_timeout: Duration,
}

impl Default for TokioProcessRunner {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

impl TokioProcessRunner {
    /// Creates a runner with default grace period.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the termination grace period.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Sets the pipe drain timeout.
    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn execute(
        &self,
        command: &CommandSpec,
        cancel: Arc<CancellationToken>,
    ) -> Result<ProcessExecution, LaunchError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::new(&command.program, source))?;

        info!(command = %command.display(), pid = ?child.id(), "Backend process started");

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx.clone())));
        }
        drop(tx);

        let token = match command.timeout {
            Some(deadline) => cancel.with_deadline(deadline),
            None => cancel,
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(supervise(
            child,
            token,
            readers,
            self.grace_period,
            self.drain_timeout,
            outcome_tx,
        ));

        Ok(ProcessExecution::new(rx, outcome_rx))
    }
}

/// Forwards one pipe line by line. Invalid UTF-8 is replaced rather than
/// ending the stream.
async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<RawOutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = RawOutputLine::new(stream, String::from_utf8_lossy(&buf));
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(%stream, error = %e, "Backend pipe read failed");
                break;
            }
        }
    }
}

async fn supervise(
    mut child: Child,
    token: Arc<CancellationToken>,
    readers: Vec<JoinHandle<()>>,
    grace_period: Duration,
    drain_timeout: Duration,
    outcome_tx: oneshot::Sender<ExitOutcome>,
) {
    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => exit_outcome(status),
            Err(e) => {
                warn!(error = %e, "Failed to wait on backend process");
                ExitOutcome::Exited { code: None }
            }
        },
        () = token.cancelled() => {
            terminate(&mut child, grace_period).await;
            if token.is_timeout() {
                ExitOutcome::TimedOut
            } else {
                ExitOutcome::Cancelled
            }
        }
    };

    // Everything already read is delivered before the outcome. Grandchildren
    // holding the pipes open must not stall the stage forever.
    let aborts: Vec<_> = readers.iter().map(JoinHandle::abort_handle).collect();
    if tokio::time::timeout(drain_timeout, futures::future::join_all(readers))
        .await
        .is_err()
    {
        warn!("Backend output pipes still open after exit; abandoning them");
        for abort in aborts {
            abort.abort();
        }
    }

    debug!(%outcome, "Backend process finished");
    let _ = outcome_tx.send(outcome);
}

fn exit_outcome(status: ExitStatus) -> ExitOutcome {
    ExitOutcome::Exited { code: status.code() }
}

/// Asks the process to stop, then kills it once the grace period elapses.
async fn terminate(child: &mut Child, grace_period: Duration) {
    request_termination(child);
    if tokio::time::timeout(grace_period, child.wait()).await.is_err() {
        warn!(pid = ?child.id(), "Backend ignored termination request; killing it");
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill backend process");
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM failed; falling back to kill");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    let _ = child.start_kill();
}
