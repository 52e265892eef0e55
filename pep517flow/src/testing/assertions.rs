//! Test assertions for stage results.

use crate::core::{StageResult, StageStatus};
use crate::errors::StageFailureKind;

/// Asserts that the result has the expected status.
pub fn assert_stage_status(result: &StageResult, expected: StageStatus) {
    assert_eq!(
        result.status, expected,
        "Expected stage '{}' to be {expected}, got {} (failure: {:?})",
        result.stage, result.status, result.failure
    );
}

/// Asserts that the stage ran its command and succeeded.
pub fn assert_ran(result: &StageResult) {
    assert_stage_status(result, StageStatus::Succeeded);
    assert!(!result.skipped, "Expected stage '{}' to run, but it was skipped", result.stage);
}

/// Asserts that the stage was skipped as up to date.
pub fn assert_skipped(result: &StageResult) {
    assert_stage_status(result, StageStatus::Succeeded);
    assert!(result.skipped, "Expected stage '{}' to be skipped", result.stage);
    assert!(
        result.diagnostics.is_empty(),
        "Skipped stage '{}' reported diagnostics: {:?}",
        result.stage,
        result.diagnostics
    );
}

/// Asserts that the stage failed with the given kind.
pub fn assert_stage_failed(result: &StageResult, kind: StageFailureKind) {
    let actual = result.failure.as_ref().map(|f| f.kind);
    assert_eq!(
        actual,
        Some(kind),
        "Expected stage '{}' to fail with {kind}, got {actual:?}",
        result.stage
    );
}

/// Asserts that the stage was cancelled without running.
pub fn assert_blocked(result: &StageResult) {
    assert_stage_status(result, StageStatus::Cancelled);
    assert!(result.exit.is_none(), "Blocked stage '{}' launched a process", result.stage);
    assert!(result.diagnostics.is_empty(), "Blocked stage '{}' has diagnostics", result.stage);
}
