//! # pep517flow
//!
//! Drives a PEP 517 build backend as a staged, cancellable build pipeline
//! for an IDE host.
//!
//! The crate provides:
//!
//! - **Staleness checks**: content fingerprints of the project configuration
//!   and source tree decide whether a stage needs to run at all
//! - **Process supervision**: backend invocations stream their output line by
//!   line and honour cooperative cancellation with a termination grace period
//! - **Output classification**: pluggable per-backend classifiers turn raw
//!   output into structured diagnostics
//! - **Planning and execution**: dependency-ordered stages with deterministic
//!   topological plans, bounded concurrency and short-circuiting of dependents
//! - **Host integration**: a [`target::BuildTarget`] facade that registers
//!   stages with the host, translates invalidation into cancellation and
//!   reports per-stage diagnostics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pep517flow::prelude::*;
//! use std::sync::Arc;
//!
//! let services = TargetServices::new(Arc::new(DetachedHostRegistry::new()));
//! let target = BuildTarget::initialize(TargetConfig::new("/path/to/project"), services)?;
//!
//! let outcome = target.build().await?;
//! assert!(outcome.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backend;
pub mod cancellation;
pub mod classify;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod fingerprint;
pub mod observability;
pub mod pipeline;
pub mod process;
pub mod stages;
pub mod target;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{BackendRegistry, BuildBackend, BuildType, PyProject, PypaBuildBackend};
    pub use crate::cancellation::{CancelReason, CancellationToken};
    pub use crate::classify::{ClassifierRegistry, OutputClassifier, Pep517Classifier};
    pub use crate::config::{PipelineConfig, TargetConfig};
    pub use crate::core::{
        ArtifactKind, BuildArtifact, DiagnosticEvent, ExitOutcome, OutputStream, PipelineStatus, RawOutputLine, Severity,
        SourceLocation, StageResult, StageStatus,
    };
    pub use crate::errors::{Pep517Error, PlanError, StageFailure, StageFailureKind};
    pub use crate::events::{
        CollectingDiagnosticsSink, DiagnosticsSink, LoggingDiagnosticsSink, NoOpDiagnosticsSink,
    };
    pub use crate::fingerprint::{
        BuildFingerprint, ContentHashOracle, FingerprintStore, InMemoryFingerprintStore,
        JsonFingerprintStore, StalenessInputs, StalenessOracle,
    };
    pub use crate::pipeline::{ExecutionPlan, Pipeline, PipelineBuilder, PipelineOutcome, StageSpec};
    pub use crate::process::{CommandSpec, CommandTemplate, ProcessRunner, TokioProcessRunner};
    pub use crate::stages::{BackendStage, CleanStage, Stage, StageContext};
    pub use crate::target::{
        BuildTarget, DetachedHostRegistry, HostStageId, HostStageRegistry, TargetServices,
    };
}
