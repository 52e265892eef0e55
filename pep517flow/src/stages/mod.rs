//! Stage trait and implementations.
//!
//! A stage is one named unit of build work. Stages never see each other:
//! the pipeline decides when a stage runs and tells it, through the
//! [`StageContext`], whether anything upstream was rebuilt.

mod backend_stage;
mod clean;

pub use backend_stage::BackendStage;
pub use clean::CleanStage;

use crate::cancellation::CancellationToken;
use crate::core::StageResult;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// What the pipeline hands a stage when it runs it.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// The pipeline run this execution belongs to.
    pub run_id: Uuid,
    /// The run's cancellation token.
    pub cancel: Arc<CancellationToken>,
    /// True if a predecessor did work in this run, which makes this stage
    /// stale regardless of its own fingerprint.
    pub upstream_rebuilt: bool,
}

impl StageContext {
    /// Creates a context for a run.
    #[must_use]
    pub fn new(run_id: Uuid, cancel: Arc<CancellationToken>) -> Self {
        Self {
            run_id,
            cancel,
            upstream_rebuilt: false,
        }
    }

    /// Marks that a predecessor did work in this run.
    #[must_use]
    pub fn with_upstream_rebuilt(mut self, rebuilt: bool) -> Self {
        self.upstream_rebuilt = rebuilt;
        self
    }

    /// Returns the cancellation reason as text, if the run was cancelled.
    #[must_use]
    pub fn cancel_message(&self) -> String {
        self.cancel
            .reason()
            .map_or_else(|| "cancelled".to_string(), |r| r.to_string())
    }
}

/// A pipeline stage.
///
/// `run` must return a terminal result and must not panic; failures are
/// reported through [`StageResult::from_failure`].
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Runs the stage to a terminal result.
    async fn run(&self, ctx: &StageContext) -> StageResult;
}
