//! A stage that runs one backend command.

use super::{Stage, StageContext};
use crate::classify::OutputClassifier;
use crate::core::{DiagnosticEvent, ExitOutcome, Severity, StageResult};
use crate::errors::{StageFailure, StageFailureKind};
use crate::fingerprint::{BuildFingerprint, FingerprintStore, StalenessInputs, StalenessOracle};
use crate::process::{CommandSpec, ProcessRunner};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct StalenessCheck {
    oracle: Arc<dyn StalenessOracle>,
    inputs: StalenessInputs,
    store: Arc<dyn FingerprintStore>,
    key: String,
}

enum Freshness {
    Fresh,
    Stale(Option<(String, BuildFingerprint)>),
}

/// Runs a backend command, classifying its output as it streams.
///
/// With a staleness check attached, the stage first compares the current
/// input fingerprint against the one recorded after its last successful
/// run and skips the command when they match. The new fingerprint is only
/// recorded once the command exits with status zero.
#[derive(Debug, Clone)]
pub struct BackendStage {
    name: String,
    command: CommandSpec,
    runner: Arc<dyn ProcessRunner>,
    classifier: Arc<dyn OutputClassifier>,
    staleness: Option<StalenessCheck>,
}

impl BackendStage {
    /// Creates a stage running `command` through `runner`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        command: CommandSpec,
        runner: Arc<dyn ProcessRunner>,
        classifier: Arc<dyn OutputClassifier>,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            runner,
            classifier,
            staleness: None,
        }
    }

    /// Skips the command when the fingerprint stored under `key` matches the
    /// current inputs.
    #[must_use]
    pub fn with_staleness(
        mut self,
        oracle: Arc<dyn StalenessOracle>,
        inputs: StalenessInputs,
        store: Arc<dyn FingerprintStore>,
        key: impl Into<String>,
    ) -> Self {
        self.staleness = Some(StalenessCheck {
            oracle,
            inputs,
            store,
            key: key.into(),
        });
        self
    }

    /// Returns the command this stage runs.
    #[must_use]
    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    async fn freshness(&self, ctx: &StageContext) -> Result<Freshness, StageFailure> {
        let Some(check) = self.staleness.clone() else {
            return Ok(Freshness::Stale(None));
        };

        let previous = check.store.load(&check.key).map(|r| r.fingerprint);
        let oracle = Arc::clone(&check.oracle);
        let inputs = check.inputs.clone();
        let verdict = tokio::task::spawn_blocking(move || oracle.is_stale(previous.as_ref(), &inputs))
            .await
            .map_err(|e| StageFailure::new(&self.name, StageFailureKind::Io, e.to_string()))?
            .map_err(|e| StageFailure::new(&self.name, StageFailureKind::ConfigUnreadable, e.to_string()))?;

        if !verdict.stale && !ctx.upstream_rebuilt {
            return Ok(Freshness::Fresh);
        }
        debug!(
            stage = %self.name,
            fingerprint = %verdict.fingerprint,
            upstream_rebuilt = ctx.upstream_rebuilt,
            "Stage is stale"
        );
        Ok(Freshness::Stale(Some((check.key, verdict.fingerprint))))
    }

    fn record(&self, fingerprint: Option<(String, BuildFingerprint)>, diagnostics: &mut Vec<DiagnosticEvent>) {
        let (Some(check), Some((key, fingerprint))) = (&self.staleness, fingerprint) else {
            return;
        };
        if let Err(e) = check.store.record(&key, &fingerprint) {
            warn!(stage = %self.name, error = %e, "Failed to persist fingerprint");
            diagnostics.push(DiagnosticEvent::warning(format!("fingerprint not saved: {e}")));
        }
    }

    fn failure_message(&self, outcome: ExitOutcome, diagnostics: &[DiagnosticEvent]) -> String {
        diagnostics
            .iter()
            .rev()
            .find(|d| d.severity == Severity::Error)
            .map_or_else(|| format!("backend {outcome}"), |d| d.message.clone())
    }
}

#[async_trait]
impl Stage for BackendStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext) -> StageResult {
        let started = Instant::now();

        if ctx.cancel.is_cancelled() {
            let failure = StageFailure::cancelled(&self.name, ctx.cancel_message());
            return StageResult::from_failure(failure, Vec::new(), started.elapsed());
        }

        let fingerprint = match self.freshness(ctx).await {
            Ok(Freshness::Fresh) => {
                info!(stage = %self.name, "Stage is up to date; skipping");
                return StageResult::skipped(&self.name, started.elapsed());
            }
            Ok(Freshness::Stale(fingerprint)) => fingerprint,
            Err(failure) => return StageResult::from_failure(failure, Vec::new(), started.elapsed()),
        };

        info!(stage = %self.name, command = %self.command.display(), "Running backend");
        let mut execution = match self.runner.execute(&self.command, Arc::clone(&ctx.cancel)).await {
            Ok(execution) => execution,
            Err(e) => {
                let failure = StageFailure::launch_failed(&self.name, e.to_string());
                return StageResult::from_failure(failure, Vec::new(), started.elapsed());
            }
        };

        let mut diagnostics = Vec::new();
        while let Some(line) = execution.next_line().await {
            diagnostics.push(self.classifier.classify(&line));
        }
        let (rest, outcome) = execution.finish().await;
        diagnostics.extend(rest.iter().map(|line| self.classifier.classify(line)));

        let elapsed = started.elapsed();
        debug!(stage = %self.name, %outcome, lines = diagnostics.len(), "Backend finished");

        let result = match outcome {
            ExitOutcome::Exited { code: Some(0) } => {
                self.record(fingerprint, &mut diagnostics);
                StageResult::succeeded(&self.name, diagnostics, elapsed)
            }
            ExitOutcome::Exited { code } => {
                let message = self.failure_message(outcome, &diagnostics);
                let failure = StageFailure::non_zero_exit(&self.name, code, message);
                StageResult::from_failure(failure, diagnostics, elapsed)
            }
            ExitOutcome::Cancelled => {
                let failure = StageFailure::cancelled(&self.name, ctx.cancel_message());
                StageResult::from_failure(failure, diagnostics, elapsed)
            }
            ExitOutcome::TimedOut => {
                let deadline = self.command.timeout.unwrap_or_default();
                let failure = StageFailure::timeout(&self.name, format!("deadline of {deadline:?} elapsed"));
                StageResult::from_failure(failure, diagnostics, elapsed)
            }
        };
        result.with_exit(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::classify::Pep517Classifier;
    use crate::core::StageStatus;
    use crate::fingerprint::{ContentHashOracle, InMemoryFingerprintStore};
    use crate::testing::{ProcessScript, ScriptedProcessRunner};
    use std::time::Duration;
    use uuid::Uuid;

    fn ctx() -> StageContext {
        StageContext::new(Uuid::now_v7(), Arc::new(CancellationToken::new()))
    }

    fn build_stage(runner: &Arc<ScriptedProcessRunner>) -> BackendStage {
        let command = CommandSpec::new("python3", "/proj").with_args(["-m", "build"]);
        BackendStage::new("build", command, runner.clone(), Arc::new(Pep517Classifier))
    }

    #[tokio::test]
    async fn test_success_collects_diagnostics_in_order() {
        let runner = Arc::new(ScriptedProcessRunner::new().with_script(
            "-m build",
            ProcessScript::exit(0)
                .with_stdout("* Creating isolated environment...")
                .with_stderr("WARNING: no license file")
                .with_stdout("Successfully built demo-1.0.tar.gz"),
        ));

        let result = build_stage(&runner).run(&ctx()).await;

        assert_eq!(result.status, StageStatus::Succeeded);
        assert!(!result.skipped);
        assert_eq!(result.exit, Some(ExitOutcome::exited(0)));
        let messages: Vec<_> = result.diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["* Creating isolated environment...", "WARNING: no license file", "Successfully built demo-1.0.tar.gz"]
        );
        assert_eq!(result.diagnostics_at(Severity::Warning).len(), 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_uses_last_error_line() {
        let runner = Arc::new(ScriptedProcessRunner::new().with_script(
            "-m build",
            ProcessScript::exit(1).with_stderr("ERROR Backend subprocess exited when trying to invoke build_sdist"),
        ));

        let result = build_stage(&runner).run(&ctx()).await;

        assert_eq!(result.status, StageStatus::Failed);
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, StageFailureKind::NonZeroExit);
        assert_eq!(failure.exit_code, Some(1));
        assert!(failure.message.starts_with("ERROR Backend subprocess"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_without_error_lines() {
        let runner = Arc::new(ScriptedProcessRunner::new().with_script("-m build", ProcessScript::exit(2)));
        let result = build_stage(&runner).run(&ctx()).await;
        assert_eq!(result.failure.unwrap().message, "backend exited with status 2");
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let runner = Arc::new(ScriptedProcessRunner::new().with_script("-m build", ProcessScript::launch_failure()));
        let result = build_stage(&runner).run(&ctx()).await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.failure.unwrap().kind, StageFailureKind::LaunchFailed);
        assert!(result.exit.is_none());
    }

    #[tokio::test]
    async fn test_already_cancelled_never_launches() {
        let runner = Arc::new(ScriptedProcessRunner::new());
        let ctx = ctx();
        ctx.cancel.cancel("project closed");

        let result = build_stage(&runner).run(&ctx).await;

        assert_eq!(result.status, StageStatus::Cancelled);
        assert_eq!(result.cancel_reason.as_deref(), Some("project closed"));
        assert_eq!(runner.invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_keeps_partial_output() {
        let runner = Arc::new(ScriptedProcessRunner::new().with_script(
            "-m build",
            ProcessScript::exit(0).with_stdout("* Building sdist...").hold_until_cancelled(),
        ));
        let stage = build_stage(&runner);
        let ctx = ctx();

        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { stage.run(&ctx).await })
        };
        runner.wait_for_invocation("-m build").await;
        ctx.cancel.cancel("config edited");

        let result = task.await.unwrap();
        assert_eq!(result.status, StageStatus::Cancelled);
        assert_eq!(result.exit, Some(ExitOutcome::Cancelled));
        assert_eq!(result.failure.unwrap().kind, StageFailureKind::Cancelled);
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_reports_timeout() {
        let runner = Arc::new(ScriptedProcessRunner::new().with_script(
            "-m build",
            ProcessScript::exit(0).hold_until_cancelled(),
        ));
        let command = CommandSpec::new("python3", "/proj")
            .with_args(["-m", "build"])
            .with_timeout(Duration::from_millis(20));
        let stage = BackendStage::new("build", command, runner.clone(), Arc::new(Pep517Classifier));
        let ctx = ctx();

        let result = stage.run(&ctx).await;

        assert_eq!(result.status, StageStatus::Cancelled);
        assert_eq!(result.exit, Some(ExitOutcome::TimedOut));
        assert_eq!(result.failure.unwrap().kind, StageFailureKind::Timeout);
        assert!(!ctx.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_fresh_inputs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("pyproject.toml");
        std::fs::write(&config, "[build-system]\nbuild-backend = \"setuptools.build_meta\"\n").unwrap();

        let store = Arc::new(InMemoryFingerprintStore::new());
        let runner = Arc::new(ScriptedProcessRunner::new());
        let stage = build_stage(&runner).with_staleness(
            Arc::new(ContentHashOracle),
            StalenessInputs::new(&config, dir.path()),
            store.clone(),
            "proj#build",
        );

        let first = stage.run(&ctx()).await;
        assert!(first.did_work());
        assert!(store.load("proj#build").is_some());

        let second = stage.run(&ctx()).await;
        assert!(second.skipped);
        assert_eq!(second.status, StageStatus::Succeeded);
        assert!(second.diagnostics.is_empty());
        assert_eq!(runner.invocation_count(), 1);

        let forced = stage.run(&ctx().with_upstream_rebuilt(true)).await;
        assert!(forced.did_work());
        assert_eq!(runner.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_config_fails_without_launch() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedProcessRunner::new());
        let stage = build_stage(&runner).with_staleness(
            Arc::new(ContentHashOracle),
            StalenessInputs::new(dir.path().join("pyproject.toml"), dir.path()),
            Arc::new(InMemoryFingerprintStore::new()),
            "proj#build",
        );

        let result = stage.run(&ctx()).await;
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.failure.unwrap().kind, StageFailureKind::ConfigUnreadable);
        assert_eq!(runner.invocation_count(), 0);
    }
}
