//! Pipeline planning and execution.
//!
//! This module provides:
//! - Stage declarations with predecessors and target paths
//! - Deterministic planning with cycle and resource-conflict detection
//! - A bounded-concurrency executor that short-circuits dependents of
//!   stages that did not succeed

mod builder;
mod executor;
mod plan;
mod spec;


pub use builder::PipelineBuilder;
pub use executor::{Pipeline, PipelineOutcome};
pub use plan::{plan, ExecutionPlan};
pub use spec::StageSpec;
