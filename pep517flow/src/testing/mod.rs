//! Testing utilities for build pipelines.
//!
//! This module provides:
//! - A scripted [`ProcessRunner`](crate::process::ProcessRunner) double that
//!   records every launch
//! - A write-window recorder that detects concurrent writes to one path
//! - Project fixtures and result assertions

mod assertions;
mod fixtures;
mod runner;
mod windows;

pub use assertions::{
    assert_blocked, assert_ran, assert_skipped, assert_stage_failed, assert_stage_status,
};
pub use fixtures::PythonProject;
pub use runner::{ProcessScript, ScriptedProcessRunner};
pub use windows::{WindowGuard, WindowRecorder, WriteWindow};
