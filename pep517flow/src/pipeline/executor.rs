//! Pipeline execution.

use super::{ExecutionPlan, StageSpec};
use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::core::{PipelineStatus, StageResult, StageStatus};
use crate::errors::{StageFailure, StageFailureKind};
use crate::events::DiagnosticsSink;
use crate::observability::{pipeline_span, stage_span};
use crate::stages::StageContext;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// The aggregate result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    /// Identifies the run.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// Aggregate status.
    pub status: PipelineStatus,
    /// One result per stage, in plan order.
    pub results: Vec<StageResult>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
    /// Why the run was cancelled, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

impl PipelineOutcome {
    /// Returns the result for `stage`.
    #[must_use]
    pub fn result(&self, stage: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    /// Returns the stages that ran their command, in plan order.
    #[must_use]
    pub fn rebuilt(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.did_work())
            .map(|r| r.stage.as_str())
            .collect()
    }
}

/// An executable, planned set of stages.
///
/// Stages run as soon as all their predecessors succeeded, up to
/// `max_workers` at once. A stage that does not succeed cancels its
/// transitive dependents without running them. Once the run's token trips,
/// no further stage is started.
pub struct Pipeline {
    name: String,
    specs: Vec<StageSpec>,
    plan: ExecutionPlan,
    config: PipelineConfig,
    sink: Arc<dyn DiagnosticsSink>,
    current: Mutex<Option<Arc<CancellationToken>>>,
    statuses: RwLock<HashMap<String, StageStatus>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("order", &self.plan.order())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub(crate) fn new(
        name: String,
        specs: Vec<StageSpec>,
        plan: ExecutionPlan,
        config: PipelineConfig,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let statuses = specs.iter().map(|s| (s.name.clone(), StageStatus::Pending)).collect();
        Self {
            name,
            specs,
            plan,
            config,
            sink,
            current: Mutex::new(None),
            statuses: RwLock::new(statuses),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the execution plan.
    #[must_use]
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the stage declarations in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.specs
    }

    /// Returns the current status of `stage` in the latest run.
    #[must_use]
    pub fn status(&self, stage: &str) -> Option<StageStatus> {
        self.statuses.read().get(stage).copied()
    }

    /// Returns true while a run is armed or in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Trips the token of the run in progress. Returns false if nothing is
    /// running.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        match self.current.lock().as_ref() {
            Some(token) => {
                token.cancel(reason);
                true
            }
            None => false,
        }
    }

    /// Publishes `cancel` as the token of the run about to start, so that
    /// [`cancel`](Self::cancel) reaches it before [`run_all`](Self::run_all)
    /// is entered. Must be followed by `run_all` with the same token.
    pub fn arm(&self, cancel: Arc<CancellationToken>) {
        *self.current.lock() = Some(cancel);
    }

    /// Runs every stage with a fresh cancellation token.
    pub async fn run(&self) -> PipelineOutcome {
        self.run_all(Arc::new(CancellationToken::new())).await
    }

    /// Runs every stage under `cancel`.
    pub async fn run_all(&self, cancel: Arc<CancellationToken>) -> PipelineOutcome {
        let run_id = Uuid::now_v7();
        self.execute(run_id, cancel)
            .instrument(pipeline_span(&self.name, run_id))
            .await
    }

    async fn execute(&self, run_id: Uuid, cancel: Arc<CancellationToken>) -> PipelineOutcome {
        let started = Instant::now();
        *self.current.lock() = Some(Arc::clone(&cancel));
        for status in self.statuses.write().values_mut() {
            *status = StageStatus::Pending;
        }
        info!(stages = self.specs.len(), workers = self.config.workers(), "Pipeline started");

        let mut run = RunState::new(self);
        let mut running = FuturesUnordered::new();

        loop {
            while running.len() < self.config.workers() {
                let Some(index) = run.next_ready() else { break };
                if cancel.is_cancelled() {
                    let reason = cancel.reason().map_or_else(String::new, |r| r.to_string());
                    run.block(index, format!("pipeline cancelled: {reason}"));
                    continue;
                }

                let spec = &self.specs[index];
                let ctx = StageContext::new(run_id, Arc::clone(&cancel)).with_upstream_rebuilt(run.upstream_rebuilt(index));
                self.transition(&spec.name, StageStatus::Running);
                debug!(stage = %spec.name, upstream_rebuilt = ctx.upstream_rebuilt, "Stage started");

                let stage = Arc::clone(&spec.runner);
                let handle = tokio::spawn(
                    async move { stage.run(&ctx).await }.instrument(stage_span(&spec.name, run_id)),
                );
                running.push(async move { (index, handle.await) });
            }

            if running.is_empty() {
                if run.has_ready() {
                    continue;
                }
                break;
            }

            if let Some((index, joined)) = running.next().await {
                let result = joined.unwrap_or_else(|e| {
                    let name = &self.specs[index].name;
                    warn!(stage = %name, error = %e, "Stage task did not complete");
                    let failure = StageFailure::new(name, StageFailureKind::Internal, format!("stage task failed: {e}"));
                    StageResult::from_failure(failure, Vec::new(), Duration::ZERO)
                });
                run.settle(index, result);
            }
        }

        let results = run.into_results();
        let status = PipelineStatus::aggregate(results.iter().map(|r| &r.status));
        let outcome = PipelineOutcome {
            run_id,
            pipeline: self.name.clone(),
            status,
            results,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            cancel_reason: cancel.reason().map(|r| r.to_string()),
        };

        *self.current.lock() = None;
        info!(status = %outcome.status, duration_ms = outcome.duration_ms, "Pipeline finished");
        self.sink.pipeline_completed(&outcome);
        outcome
    }

    fn transition(&self, stage: &str, next: StageStatus) {
        if let Some(status) = self.statuses.write().get_mut(stage) {
            if let Err(e) = status.advance(next) {
                warn!(stage, error = %e, "Ignoring illegal stage transition");
            }
        }
    }
}

/// Book-keeping for one run.
struct RunState<'a> {
    pipeline: &'a Pipeline,
    results: Vec<Option<StageResult>>,
    waiting_on: Vec<usize>,
    /// Ready stages keyed by plan position.
    ready: BTreeSet<usize>,
}

impl<'a> RunState<'a> {
    fn new(pipeline: &'a Pipeline) -> Self {
        let plan = &pipeline.plan;
        let waiting_on: Vec<usize> = (0..pipeline.specs.len())
            .map(|i| plan.predecessor_indices(i).len())
            .collect();
        let ready = plan
            .order_indices()
            .iter()
            .filter(|&&i| waiting_on[i] == 0)
            .map(|&i| plan.position_of(i))
            .collect();
        Self {
            pipeline,
            results: vec![None; pipeline.specs.len()],
            waiting_on,
            ready,
        }
    }

    fn next_ready(&mut self) -> Option<usize> {
        let position = self.ready.pop_first()?;
        Some(self.pipeline.plan.order_indices()[position])
    }

    fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    fn upstream_rebuilt(&self, index: usize) -> bool {
        self.pipeline
            .plan
            .predecessor_indices(index)
            .iter()
            .any(|&p| self.results[p].as_ref().is_some_and(StageResult::did_work))
    }

    fn settle(&mut self, index: usize, result: StageResult) {
        let pipeline = self.pipeline;
        let plan = &pipeline.plan;
        let name = &pipeline.specs[index].name;
        let success = result.is_success();

        pipeline.transition(name, result.status);
        pipeline.sink.stage_completed(&result);
        self.results[index] = Some(result);

        if success {
            for &d in plan.dependent_indices(index) {
                self.waiting_on[d] -= 1;
                if self.waiting_on[d] == 0 {
                    self.ready.insert(plan.position_of(d));
                }
            }
        } else {
            for &d in plan.dependent_indices(index) {
                if self.results[d].is_none() {
                    self.block(d, format!("predecessor '{name}' did not succeed"));
                }
            }
        }
    }

    fn block(&mut self, index: usize, reason: String) {
        let pipeline = self.pipeline;
        let name = &pipeline.specs[index].name;
        info!(stage = %name, %reason, "Stage cancelled without running");
        let result = StageResult::blocked(name, reason);
        self.settle(index, result);
    }

    fn into_results(self) -> Vec<StageResult> {
        let mut results = self.results;
        self.pipeline
            .plan
            .order_indices()
            .iter()
            .filter_map(|&i| results[i].take())
            .collect()
    }
}
