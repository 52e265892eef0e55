//! Diagnostics sink trait and implementations.

use crate::core::{Severity, StageResult};
use crate::pipeline::PipelineOutcome;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

/// Receives per-stage diagnostic batches.
///
/// The host's diagnostics collector implements this. Calls are append-only:
/// a stage's batch is delivered once, in the order the backend emitted it.
pub trait DiagnosticsSink: Send + Sync {
    /// Called once when a stage reaches a terminal state, including stages
    /// cancelled because a predecessor did not succeed.
    fn stage_completed(&self, result: &StageResult);

    /// Called once when a pipeline run has settled.
    fn pipeline_completed(&self, _outcome: &PipelineOutcome) {}
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDiagnosticsSink;

impl DiagnosticsSink for NoOpDiagnosticsSink {
    fn stage_completed(&self, _result: &StageResult) {}
}

/// A sink that forwards diagnostics to `tracing` at a matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDiagnosticsSink;

impl LoggingDiagnosticsSink {
    /// Creates a new logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DiagnosticsSink for LoggingDiagnosticsSink {
    fn stage_completed(&self, result: &StageResult) {
        for event in &result.diagnostics {
            let location = event.location.as_ref().map(ToString::to_string);
            match event.severity {
                Severity::Error => error!(stage = %result.stage, location = ?location, "{}", event.message),
                Severity::Warning => warn!(stage = %result.stage, location = ?location, "{}", event.message),
                Severity::Info => debug!(stage = %result.stage, "{}", event.message),
            }
        }

        match &result.failure {
            Some(failure) => warn!(
                stage = %result.stage,
                status = %result.status,
                kind = %failure.kind,
                exit_code = failure.exit_code,
                "{}", failure.message
            ),
            None => info!(
                stage = %result.stage,
                status = %result.status,
                skipped = result.skipped,
                duration_ms = result.duration_ms,
                "Stage completed"
            ),
        }
    }

    fn pipeline_completed(&self, outcome: &PipelineOutcome) {
        info!(
            pipeline = %outcome.pipeline,
            run_id = %outcome.run_id,
            status = %outcome.status,
            duration_ms = outcome.duration_ms,
            "Pipeline completed"
        );
    }
}

/// A sink that keeps every batch, for tests and hosts that render later.
#[derive(Debug, Default)]
pub struct CollectingDiagnosticsSink {
    results: RwLock<Vec<StageResult>>,
    outcomes: RwLock<Vec<PipelineOutcome>>,
}

impl CollectingDiagnosticsSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all delivered stage batches in delivery order.
    #[must_use]
    pub fn results(&self) -> Vec<StageResult> {
        self.results.read().clone()
    }

    /// Returns the batch delivered for `stage`.
    #[must_use]
    pub fn result(&self, stage: &str) -> Option<StageResult> {
        self.results.read().iter().find(|r| r.stage == stage).cloned()
    }

    /// Returns the number of stage batches delivered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    /// Returns true if nothing has been delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }

    /// Returns the pipeline outcomes delivered so far.
    #[must_use]
    pub fn outcomes(&self) -> Vec<PipelineOutcome> {
        self.outcomes.read().clone()
    }

    /// Clears everything collected.
    pub fn clear(&self) {
        self.results.write().clear();
        self.outcomes.write().clear();
    }
}

impl DiagnosticsSink for CollectingDiagnosticsSink {
    fn stage_completed(&self, result: &StageResult) {
        self.results.write().push(result.clone());
    }

    fn pipeline_completed(&self, outcome: &PipelineOutcome) {
        self.outcomes.write().push(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DiagnosticEvent;
    use crate::errors::StageFailure;
    use std::time::Duration;

    fn failed_build() -> StageResult {
        StageResult::from_failure(
            StageFailure::non_zero_exit("build", Some(1), "ERROR boom"),
            vec![DiagnosticEvent::info("* Building sdist..."), DiagnosticEvent::error("ERROR boom")],
            Duration::from_millis(12),
        )
    }

    #[test]
    fn test_noop_sink() {
        NoOpDiagnosticsSink.stage_completed(&failed_build());
    }

    #[test]
    fn test_logging_sink() {
        let sink = LoggingDiagnosticsSink::new();
        sink.stage_completed(&failed_build());
        sink.stage_completed(&StageResult::skipped("prepare", Duration::ZERO));
    }

    #[test]
    fn test_collecting_sink_keeps_batches_in_order() {
        let sink = CollectingDiagnosticsSink::new();
        assert!(sink.is_empty());

        sink.stage_completed(&StageResult::skipped("prepare", Duration::ZERO));
        sink.stage_completed(&failed_build());
        sink.stage_completed(&StageResult::blocked("install", "predecessor 'build' failed"));

        assert_eq!(sink.len(), 3);
        let stages: Vec<_> = sink.results().into_iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec!["prepare", "build", "install"]);
        assert_eq!(sink.result("build").unwrap().diagnostics.len(), 2);
        assert!(sink.result("install").unwrap().diagnostics.is_empty());

        sink.clear();
        assert!(sink.is_empty());
    }
}
