//! Backend process invocation.
//!
//! This module provides:
//! - Command specifications and argv templates
//! - The [`ProcessRunner`] seam and its tokio implementation

mod command;
mod runner;

pub use command::{CommandSpec, CommandTemplate, TemplateVars};
pub use runner::{ProcessExecution, ProcessRunner, TokioProcessRunner};
