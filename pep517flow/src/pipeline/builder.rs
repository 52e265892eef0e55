//! Pipeline builder with validation.

use super::{plan, Pipeline, StageSpec};
use crate::config::PipelineConfig;
use crate::errors::PlanError;
use crate::events::{DiagnosticsSink, NoOpDiagnosticsSink};
use std::fmt;
use std::sync::Arc;

/// Builder for creating validated pipelines.
///
/// Validation happens once, in [`build`](Self::build): a pipeline either
/// plans cleanly or is refused with a [`PlanError`].
#[derive(Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageSpec>,
    config: PipelineConfig,
    sink: Arc<dyn DiagnosticsSink>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            config: PipelineConfig::default(),
            sink: Arc::new(NoOpDiagnosticsSink),
        }
    }

    /// Sets the execution configuration.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the diagnostics sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Adds a stage.
    #[must_use]
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.add_stage(spec);
        self
    }

    /// Adds a stage in place.
    pub fn add_stage(&mut self, spec: StageSpec) {
        self.stages.push(spec);
    }

    /// Returns the declared stage names in declaration order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Plans the declared stages and builds the pipeline.
    pub fn build(self) -> Result<Pipeline, PlanError> {
        let plan = plan(&self.stages)?;
        Ok(Pipeline::new(self.name, self.stages, plan, self.config, self.sink))
    }
}
