//! Stage and pipeline status enums.

use crate::errors::InvalidTransition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a stage.
///
/// ```text
/// Pending -> Running -> {Succeeded, Failed, Cancelled}
/// Pending -> Cancelled            (blocked by a failed predecessor)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage is waiting for its predecessors.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage completed successfully (or was skipped as up to date).
    Succeeded,
    /// Stage failed.
    Failed,
    /// Stage was cancelled, or blocked by a predecessor that did not succeed.
    Cancelled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if `next` is a legal successor of this status.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
        )
    }

    /// Moves to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: Self) -> Result<(), InvalidTransition> {
        if !self.can_transition_to(next) {
            return Err(InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

/// The aggregate outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Every stage succeeded.
    Succeeded,
    /// At least one stage failed.
    Failed,
    /// No stage failed but at least one was cancelled.
    Cancelled,
}

impl PipelineStatus {
    /// Aggregates stage statuses: any failure wins, then any cancellation.
    #[must_use]
    pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a StageStatus>) -> Self {
        let mut outcome = Self::Succeeded;
        for status in statuses {
            match status {
                StageStatus::Failed => return Self::Failed,
                StageStatus::Cancelled | StageStatus::Pending | StageStatus::Running => {
                    outcome = Self::Cancelled;
                }
                StageStatus::Succeeded => {}
            }
        }
        outcome
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
