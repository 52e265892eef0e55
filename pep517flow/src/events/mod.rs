//! Host-facing diagnostics delivery.
//!
//! Diagnostics are delivered in per-stage batches: a sink is called exactly
//! once for every stage that reaches a terminal state, never per line.

mod sink;

pub use sink::{CollectingDiagnosticsSink, DiagnosticsSink, LoggingDiagnosticsSink, NoOpDiagnosticsSink};
