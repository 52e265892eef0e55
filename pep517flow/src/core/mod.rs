//! Core domain model types.
//!
//! This module contains the fundamental types shared by every layer:
//! - Stage and pipeline status enums with the stage state machine
//! - Raw backend output lines
//! - Diagnostic events
//! - Stage results and process exit outcomes
//! - Build artifacts

mod artifact;
mod diagnostic;
mod output;
mod result;
mod status;

pub use artifact::{ArtifactKind, BuildArtifact};
pub use diagnostic::{DiagnosticEvent, EventKind, Severity, SourceLocation};
pub use output::{OutputStream, RawOutputLine};
pub use result::{ExitOutcome, StageResult};
pub use status::{PipelineStatus, StageStatus};
