//! Error types for pep517flow.
//!
//! Errors fall into two families. Planning errors ([`PlanError`]) are fatal:
//! the pipeline refuses to run at all and the host should surface them as a
//! configuration problem. Stage failures ([`StageFailure`]) are attributable
//! to a single stage and only short-circuit that stage's dependents.

use crate::core::StageStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The umbrella error type for pep517flow operations.
#[derive(Debug, Error)]
pub enum Pep517Error {
    /// The pipeline could not be planned.
    #[error("{0}")]
    Plan(#[from] PlanError),

    /// A stage failed while executing.
    #[error("{0}")]
    Stage(#[from] StageFailure),

    /// The project does not describe a usable build backend.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// Persisted state could not be read or written.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The target configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The build target was closed by the host.
    #[error("Build target is closed")]
    Closed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a planning error for host diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PLAN-002-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("summary".to_string(), serde_json::json!(self.summary));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        if !self.context.is_empty() {
            map.insert("context".to_string(), serde_json::json!(self.context));
        }
        map
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cyclic dependency between stages: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }

    /// Returns the distinct stages participating in the cycle.
    #[must_use]
    pub fn participants(&self) -> Vec<String> {
        let mut stages = self.cycle_path.clone();
        if stages.len() > 1 && stages.first() == stages.last() {
            stages.pop();
        }
        stages
    }
}

/// Planning-time errors. The pipeline refuses to run when any is raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The build configuration file could not be read.
    #[error("Configuration file '{}' is unreadable: {reason}", path.display())]
    ConfigUnreadable {
        /// The configuration file path.
        path: PathBuf,
        /// Why reading failed.
        reason: String,
    },

    /// The stage graph contains a cycle.
    #[error("{0}")]
    CyclicDependency(#[from] CycleDetectedError),

    /// Two stages without a dependency edge declare overlapping target paths.
    #[error(
        "Stages '{first}' and '{second}' may run concurrently but both write to '{}'",
        path.display()
    )]
    ResourceConflict {
        /// The earlier declared stage.
        first: String,
        /// The later declared stage.
        second: String,
        /// The overlapping target path.
        path: PathBuf,
    },

    /// A stage names a predecessor that was never declared.
    #[error("Stage '{stage}' depends on unknown stage '{predecessor}'")]
    UnknownPredecessor {
        /// The declaring stage.
        stage: String,
        /// The unresolved predecessor name.
        predecessor: String,
    },

    /// A stage depends on itself.
    #[error("Stage '{0}' cannot depend on itself")]
    SelfDependency(String),

    /// Two stages share a name.
    #[error("Stage '{0}' is declared more than once")]
    DuplicateStage(String),

    /// The pipeline has no stages.
    #[error("Pipeline has no stages")]
    EmptyPipeline,

    /// A staleness exclusion glob does not parse.
    #[error("Invalid exclusion pattern '{pattern}': {reason}")]
    InvalidExclusion {
        /// The offending glob.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl PlanError {
    /// Returns the stages involved in the error.
    #[must_use]
    pub fn stages(&self) -> Vec<String> {
        match self {
            Self::ConfigUnreadable { .. } | Self::EmptyPipeline | Self::InvalidExclusion { .. } => {
                Vec::new()
            }
            Self::CyclicDependency(cycle) => cycle.participants(),
            Self::ResourceConflict { first, second, .. } => vec![first.clone(), second.clone()],
            Self::UnknownPredecessor { stage, predecessor } => {
                vec![stage.clone(), predecessor.clone()]
            }
            Self::SelfDependency(stage) | Self::DuplicateStage(stage) => vec![stage.clone()],
        }
    }

    /// Returns structured metadata suitable for rendering in the host.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        match self {
            Self::ConfigUnreadable { path, reason } => {
                ContractErrorInfo::new("PLAN-001-CONFIG", self.to_string())
                    .with_fix_hint("Make sure pyproject.toml exists and is readable.")
                    .with_context_entry("path", path.display().to_string())
                    .with_context_entry("reason", reason.clone())
            }
            Self::CyclicDependency(cycle) => {
                ContractErrorInfo::new("PLAN-002-CYCLE", self.to_string())
                    .with_fix_hint("Remove one of the dependencies in the cycle to break it.")
                    .with_context_entry("cycle", cycle.cycle_path.join(" -> "))
            }
            Self::ResourceConflict { path, .. } => {
                ContractErrorInfo::new("PLAN-003-CONFLICT", self.to_string())
                    .with_fix_hint(
                        "Declare a dependency between the stages or give them distinct target paths.",
                    )
                    .with_context_entry("path", path.display().to_string())
            }
            Self::UnknownPredecessor { predecessor, .. } => {
                ContractErrorInfo::new("PLAN-004-MISSING_DEP", self.to_string())
                    .with_fix_hint("Check the predecessor name for typos.")
                    .with_context_entry("predecessor", predecessor.clone())
            }
            Self::SelfDependency(_) => ContractErrorInfo::new("PLAN-004-MISSING_DEP", self.to_string())
                .with_fix_hint("A stage cannot list itself as a predecessor."),
            Self::DuplicateStage(_) => ContractErrorInfo::new("PLAN-005-DUPLICATE", self.to_string())
                .with_fix_hint("Stage names must be unique within a pipeline."),
            Self::EmptyPipeline => ContractErrorInfo::new("PLAN-006-EMPTY", self.to_string())
                .with_fix_hint("Add at least one stage to the pipeline before building."),
            Self::InvalidExclusion { pattern, .. } => {
                ContractErrorInfo::new("PLAN-007-EXCLUSION", self.to_string())
                    .with_fix_hint("Exclusion patterns use gitignore glob syntax.")
                    .with_context_entry("pattern", pattern.clone())
            }
        }
    }
}

/// The kind of execution-time failure a stage reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFailureKind {
    /// The backend executable could not be started.
    LaunchFailed,
    /// A caller-supplied deadline elapsed.
    Timeout,
    /// The backend ran to completion but reported failure.
    NonZeroExit,
    /// The stage was cancelled.
    Cancelled,
    /// The configuration file vanished or became unreadable mid-run.
    ConfigUnreadable,
    /// Stage-local filesystem work failed.
    Io,
    /// The stage task panicked.
    Internal,
}

impl StageFailureKind {
    /// Returns the stage status this failure maps to.
    #[must_use]
    pub fn status(self) -> StageStatus {
        match self {
            Self::Timeout | Self::Cancelled => StageStatus::Cancelled,
            Self::LaunchFailed
            | Self::NonZeroExit
            | Self::ConfigUnreadable
            | Self::Io
            | Self::Internal => StageStatus::Failed,
        }
    }
}

impl fmt::Display for StageFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LaunchFailed => write!(f, "launch_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::NonZeroExit => write!(f, "non_zero_exit"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::ConfigUnreadable => write!(f, "config_unreadable"),
            Self::Io => write!(f, "io"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// An execution-time failure attributed to one stage.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Stage '{stage}' {kind}: {message}")]
pub struct StageFailure {
    /// The stage that failed.
    pub stage: String,
    /// What went wrong.
    pub kind: StageFailureKind,
    /// The backend's own message, or a description of the failure.
    pub message: String,
    /// The backend's exit code, when it exited on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl StageFailure {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(stage: impl Into<String>, kind: StageFailureKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind,
            message: message.into(),
            exit_code: None,
        }
    }

    /// Creates a launch failure.
    #[must_use]
    pub fn launch_failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, StageFailureKind::LaunchFailed, message)
    }

    /// Creates a timeout failure.
    #[must_use]
    pub fn timeout(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, StageFailureKind::Timeout, message)
    }

    /// Creates a non-zero exit failure.
    #[must_use]
    pub fn non_zero_exit(stage: impl Into<String>, code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            exit_code: code,
            ..Self::new(stage, StageFailureKind::NonZeroExit, message)
        }
    }

    /// Creates a cancellation failure.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, StageFailureKind::Cancelled, message)
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage".to_string(), serde_json::json!(self.stage));
        map.insert("kind".to_string(), serde_json::json!(self.kind.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        if let Some(code) = self.exit_code {
            map.insert("exit_code".to_string(), serde_json::json!(code));
        }
        map
    }
}

/// Error raised when a backend executable cannot be started.
#[derive(Debug, Error)]
#[error("Failed to launch '{program}': {source}")]
pub struct LaunchError {
    /// The program that failed to start.
    pub program: String,
    /// The underlying spawn error.
    #[source]
    pub source: std::io::Error,
}

impl LaunchError {
    /// Creates a new launch error.
    #[must_use]
    pub fn new(program: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            program: program.into(),
            source,
        }
    }
}

/// Errors describing why a project cannot be driven by a PEP 517 backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The configuration does not describe a PEP 517 build system.
    #[error("Not a valid python PEP-517 build system: {0}")]
    NotPep517(String),

    /// The configuration file is not valid TOML.
    #[error("Invalid pyproject.toml: {0}")]
    InvalidToml(String),

    /// No registered backend handles the declared `build-backend`.
    #[error("Unsupported build backend '{0}'")]
    UnsupportedBackend(String),

    /// The backend cannot produce the requested distribution type.
    #[error("Backend '{backend}' cannot build {build_type}")]
    UnsupportedBuildType {
        /// The backend display name.
        backend: String,
        /// The requested distribution type.
        build_type: String,
    },
}

/// Errors raised by fingerprint persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The state file could not be read or written.
    #[error("Fingerprint store IO error at '{}': {source}", path.display())]
    Io {
        /// The state file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The state could not be serialized.
    #[error("Fingerprint store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error raised when a stage state machine is driven illegally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid stage transition from {from} to {to}")]
pub struct InvalidTransition {
    /// The current status.
    pub from: StageStatus,
    /// The requested status.
    pub to: StageStatus,
}
