//! Scripted process runner double.

use super::WindowRecorder;
use crate::cancellation::CancellationToken;
use crate::core::{ExitOutcome, RawOutputLine};
use crate::errors::LaunchError;
use crate::process::{CommandSpec, ProcessExecution, ProcessRunner};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};

/// What a scripted process does.
#[derive(Debug, Clone, Default)]
pub struct ProcessScript {
    lines: Vec<RawOutputLine>,
    exit_code: i32,
    delay: Option<Duration>,
    hold_until_cancelled: bool,
    launch_failure: bool,
    writes: Option<PathBuf>,
    creates: Vec<(PathBuf, String)>,
}

impl ProcessScript {
    /// A process that exits with `code`.
    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    /// A process whose executable cannot be found.
    #[must_use]
    pub fn launch_failure() -> Self {
        Self {
            launch_failure: true,
            ..Self::default()
        }
    }

    /// Emits a stdout line.
    #[must_use]
    pub fn with_stdout(mut self, text: impl Into<String>) -> Self {
        self.lines.push(RawOutputLine::stdout(text));
        self
    }

    /// Emits a stderr line.
    #[must_use]
    pub fn with_stderr(mut self, text: impl Into<String>) -> Self {
        self.lines.push(RawOutputLine::stderr(text));
        self
    }

    /// Runs for `delay` after printing, unless cancelled first.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Keeps running after printing until the token trips.
    #[must_use]
    pub fn hold_until_cancelled(mut self) -> Self {
        self.hold_until_cancelled = true;
        self
    }

    /// Writes `content` to `path` on launch. Relative paths resolve against
    /// the command's working directory.
    #[must_use]
    pub fn creating(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.creates.push((path.into(), content.into()));
        self
    }

    /// Records a write window on `path` while running.
    #[must_use]
    pub fn writing_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.writes = Some(path.into());
        self
    }
}

/// A [`ProcessRunner`] that plays back scripts instead of spawning.
///
/// Scripts are matched against the command line by substring, first
/// registered first; unmatched commands exit 0 silently. Every launch is
/// recorded, which makes the runner a spy as well.
#[derive(Debug, Default)]
pub struct ScriptedProcessRunner {
    scripts: Vec<(String, ProcessScript)>,
    recorder: Option<Arc<WindowRecorder>>,
    invocations: RwLock<Vec<CommandSpec>>,
    launched: Notify,
}

impl ScriptedProcessRunner {
    /// Creates a runner where every command exits 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plays `script` for commands containing `pattern`.
    #[must_use]
    pub fn with_script(mut self, pattern: impl Into<String>, script: ProcessScript) -> Self {
        self.scripts.push((pattern.into(), script));
        self
    }

    /// Reports write windows to `recorder`.
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<WindowRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Returns every command launched so far, in launch order.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandSpec> {
        self.invocations.read().clone()
    }

    /// Returns the number of launches.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.invocations.read().len()
    }

    /// Returns how many launched commands contain `pattern`.
    #[must_use]
    pub fn launches_of(&self, pattern: &str) -> usize {
        self.invocations
            .read()
            .iter()
            .filter(|c| c.display().contains(pattern))
            .count()
    }

    /// Waits until a command containing `pattern` has been launched.
    pub async fn wait_for_invocation(&self, pattern: &str) {
        loop {
            let launched = self.launched.notified();
            if self.launches_of(pattern) > 0 {
                return;
            }
            launched.await;
        }
    }

    fn script_for(&self, command: &CommandSpec) -> ProcessScript {
        let line = command.display();
        self.scripts
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| ProcessScript::exit(0))
    }
}

#[async_trait]
impl ProcessRunner for ScriptedProcessRunner {
    async fn execute(
        &self,
        command: &CommandSpec,
        cancel: Arc<CancellationToken>,
    ) -> Result<ProcessExecution, LaunchError> {
        let script = self.script_for(command);
        self.invocations.write().push(command.clone());
        self.launched.notify_waiters();

        if script.launch_failure {
            let source = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
            return Err(LaunchError::new(&command.program, source));
        }

        for (path, content) in &script.creates {
            let path = command.cwd.join(path);
            let written = path
                .parent()
                .map_or(Ok(()), std::fs::create_dir_all)
                .and_then(|()| std::fs::write(&path, content));
            if let Err(source) = written {
                return Err(LaunchError::new(&command.program, source));
            }
        }

        let token = match command.timeout {
            Some(deadline) => cancel.with_deadline(deadline),
            None => cancel,
        };
        let window = match (&self.recorder, &script.writes) {
            (Some(recorder), Some(path)) => Some(recorder.open(path, command.display())),
            _ => None,
        };

        let (tx, rx) = mpsc::channel(script.lines.len().max(1));
        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(async move {
            for line in script.lines {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            drop(tx);

            let interrupted = if script.hold_until_cancelled {
                token.cancelled().await;
                true
            } else if let Some(delay) = script.delay {
                tokio::select! {
                    () = tokio::time::sleep(delay) => false,
                    () = token.cancelled() => true,
                }
            } else {
                false
            };

            let outcome = match (interrupted, token.is_timeout()) {
                (false, _) => ExitOutcome::exited(script.exit_code),
                (true, true) => ExitOutcome::TimedOut,
                (true, false) => ExitOutcome::Cancelled,
            };
            drop(window);
            let _ = outcome_tx.send(outcome);
        });

        Ok(ProcessExecution::new(rx, outcome_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unmatched_command_exits_zero() {
        let runner = ScriptedProcessRunner::new();
        let token = Arc::new(CancellationToken::new());
        let execution = runner.execute(&CommandSpec::new("true", "."), token).await.unwrap();

        let (lines, outcome) = execution.finish().await;
        assert!(lines.is_empty());
        assert!(outcome.is_success());
        assert_eq!(runner.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_script_plays_lines_then_exit() {
        let runner = ScriptedProcessRunner::new()
            .with_script("build", ProcessScript::exit(1).with_stdout("a").with_stderr("ERROR b"));
        let token = Arc::new(CancellationToken::new());
        let command = CommandSpec::new("python3", ".").with_args(["-m", "build"]);

        let (lines, outcome) = runner.execute(&command, token).await.unwrap().finish().await;
        assert_eq!(lines, vec![RawOutputLine::stdout("a"), RawOutputLine::stderr("ERROR b")]);
        assert_eq!(outcome, ExitOutcome::exited(1));
        assert_eq!(runner.launches_of("-m build"), 1);
    }

    #[tokio::test]
    async fn test_script_creates_files_under_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedProcessRunner::new()
            .with_script("build", ProcessScript::exit(0).creating("src/demo.egg-info/PKG-INFO", "Name: demo\n"));
        let token = Arc::new(CancellationToken::new());
        let command = CommandSpec::new("python3", dir.path()).with_args(["-m", "build"]);

        let (_, outcome) = runner.execute(&command, token).await.unwrap().finish().await;
        assert!(outcome.is_success());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/demo.egg-info/PKG-INFO")).unwrap(),
            "Name: demo\n"
        );
    }

    #[tokio::test]
    async fn test_hold_until_cancelled() {
        let runner = ScriptedProcessRunner::new().with_script("sleep", ProcessScript::exit(0).hold_until_cancelled());
        let token = Arc::new(CancellationToken::new());
        let execution = runner.execute(&CommandSpec::new("sleep", "."), token.clone()).await.unwrap();

        token.cancel("stop");
        let (_, outcome) = execution.finish().await;
        assert_eq!(outcome, ExitOutcome::Cancelled);
    }
}
