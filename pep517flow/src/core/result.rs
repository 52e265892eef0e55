//! Stage results and process exit outcomes.

use super::{DiagnosticEvent, Severity, StageStatus};
use crate::errors::StageFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a backend process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExitOutcome {
    /// The process exited on its own. `code` is `None` when it was killed by a signal.
    Exited {
        /// The exit code.
        code: Option<i32>,
    },
    /// The cancellation token tripped and the process was terminated.
    Cancelled,
    /// A deadline elapsed and the process was terminated.
    TimedOut,
}

impl ExitOutcome {
    /// Creates an outcome from an exit code.
    #[must_use]
    pub fn exited(code: i32) -> Self {
        Self::Exited { code: Some(code) }
    }

    /// Returns true if the process exited with status zero.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0) })
    }

    /// Returns the exit code, if the process exited on its own.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } => *code,
            Self::Cancelled | Self::TimedOut => None,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "exited with status {code}"),
            Self::Exited { code: None } => write!(f, "terminated by signal"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// The result of one stage run.
///
/// Owned by the stage that produced it and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage name.
    pub stage: String,
    /// Terminal status.
    pub status: StageStatus,
    /// Diagnostics in the order the backend emitted them.
    #[serde(default)]
    pub diagnostics: Vec<DiagnosticEvent>,
    /// How the backend process ended, if one was launched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitOutcome>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
    /// True when the stage was up to date and did no work.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    /// Structured failure, for failed or cancelled stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    /// Why the stage was cancelled without running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

impl StageResult {
    fn base(stage: impl Into<String>, status: StageStatus, duration: Duration) -> Self {
        Self {
            stage: stage.into(),
            status,
            diagnostics: Vec::new(),
            exit: None,
            duration_ms: duration.as_secs_f64() * 1000.0,
            skipped: false,
            failure: None,
            cancel_reason: None,
        }
    }

    /// Creates a result for a stage that ran and succeeded.
    #[must_use]
    pub fn succeeded(stage: impl Into<String>, diagnostics: Vec<DiagnosticEvent>, duration: Duration) -> Self {
        Self {
            diagnostics,
            ..Self::base(stage, StageStatus::Succeeded, duration)
        }
    }

    /// Creates a result for a stage skipped because its inputs were unchanged.
    #[must_use]
    pub fn skipped(stage: impl Into<String>, duration: Duration) -> Self {
        Self {
            skipped: true,
            ..Self::base(stage, StageStatus::Succeeded, duration)
        }
    }

    /// Creates a failed or cancelled result from a failure.
    ///
    /// The status follows the failure kind: timeouts and cancellations map
    /// to `Cancelled`, everything else to `Failed`.
    #[must_use]
    pub fn from_failure(failure: StageFailure, diagnostics: Vec<DiagnosticEvent>, duration: Duration) -> Self {
        let status = failure.kind.status();
        let cancel_reason = (status == StageStatus::Cancelled).then(|| failure.message.clone());
        Self {
            diagnostics,
            cancel_reason,
            ..Self::base(failure.stage.clone(), status, duration)
        }
        .with_failure(failure)
    }

    /// Creates a result for a stage that never started because a
    /// predecessor did not succeed or the run was cancelled first.
    #[must_use]
    pub fn blocked(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            cancel_reason: Some(reason.into()),
            ..Self::base(stage, StageStatus::Cancelled, Duration::ZERO)
        }
    }

    /// Records the process exit outcome.
    #[must_use]
    pub fn with_exit(mut self, exit: ExitOutcome) -> Self {
        self.exit = Some(exit);
        self
    }

    fn with_failure(mut self, failure: StageFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Returns true if the stage succeeded (ran or skipped).
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the stage ran its command and succeeded.
    #[must_use]
    pub fn did_work(&self) -> bool {
        self.is_success() && !self.skipped
    }

    /// Returns the diagnostics at a given severity.
    #[must_use]
    pub fn diagnostics_at(&self, severity: Severity) -> Vec<&DiagnosticEvent> {
        self.diagnostics.iter().filter(|d| d.severity == severity).collect()
    }

    /// Returns the wall-clock duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_ms / 1000.0)
    }
}
