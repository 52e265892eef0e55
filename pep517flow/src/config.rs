//! Configuration types for pipelines and build targets.

use crate::backend::BuildType;
use crate::errors::Pep517Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of stages running at once. `1` runs sequentially.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// How long a backend may take to exit after a termination request.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Per-stage deadline in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_timeout_seconds: Option<f64>,
    /// Where fingerprints are persisted across restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

fn default_max_workers() -> usize {
    1
}

fn default_grace_period_ms() -> u64 {
    5000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            grace_period_ms: default_grace_period_ms(),
            stage_timeout_seconds: None,
            state_file: None,
        }
    }
}

impl PipelineConfig {
    /// Creates a new pipeline configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker limit. Zero is treated as one.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Sets the termination grace period.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period_ms = u64::try_from(grace_period.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the per-stage deadline.
    #[must_use]
    pub fn with_stage_timeout(mut self, seconds: f64) -> Self {
        self.stage_timeout_seconds = Some(seconds);
        self
    }

    /// Sets the fingerprint state file.
    #[must_use]
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Gets the worker limit, never less than one.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.max_workers.max(1)
    }

    /// Gets the grace period as Duration.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Gets the stage deadline as Duration. Non-positive values disable it.
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Configuration for a python build target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// `pyproject.toml`, or the directory holding it.
    pub project_file: PathBuf,
    /// Interpreter used to create the virtual environment.
    #[serde(default = "default_python")]
    pub python: String,
    /// Virtual environment directory, relative to the project root.
    #[serde(default = "default_venv_dir")]
    pub venv_dir: PathBuf,
    /// Which distributions to build.
    #[serde(default)]
    pub build_type: BuildType,
    /// Pipeline execution settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_venv_dir() -> PathBuf {
    PathBuf::from(".venv")
}

impl TargetConfig {
    /// Creates a configuration for the project at `project_file`.
    #[must_use]
    pub fn new(project_file: impl Into<PathBuf>) -> Self {
        Self {
            project_file: project_file.into(),
            python: default_python(),
            venv_dir: default_venv_dir(),
            build_type: BuildType::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    /// Sets the interpreter.
    #[must_use]
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Sets the virtual environment directory.
    #[must_use]
    pub fn with_venv_dir(mut self, venv_dir: impl Into<PathBuf>) -> Self {
        self.venv_dir = venv_dir.into();
        self
    }

    /// Sets the distribution type.
    #[must_use]
    pub fn with_build_type(mut self, build_type: BuildType) -> Self {
        self.build_type = build_type;
        self
    }

    /// Sets the pipeline configuration.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Parses a configuration from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, Pep517Error> {
        toml::from_str(content).map_err(|e| Pep517Error::Config(e.to_string()))
    }

    /// Loads a configuration from a TOML file. Relative project paths are
    /// resolved against the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Pep517Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        if config.project_file.is_relative() {
            if let Some(dir) = path.parent() {
                config.project_file = dir.join(&config.project_file);
            }
        }
        Ok(config)
    }
}
