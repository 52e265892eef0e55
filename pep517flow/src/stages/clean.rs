//! A stage that empties the backend's artifact directory.

use super::{Stage, StageContext};
use crate::core::{DiagnosticEvent, StageResult};
use crate::errors::{StageFailure, StageFailureKind};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Deletes every entry inside a build directory, leaving the directory
/// itself in place. A missing directory is already clean.
#[derive(Debug, Clone)]
pub struct CleanStage {
    name: String,
    build_dir: PathBuf,
}

impl CleanStage {
    /// Creates a clean stage for `build_dir`.
    #[must_use]
    pub fn new(name: impl Into<String>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            build_dir: build_dir.into(),
        }
    }

    /// Returns the directory this stage empties.
    #[must_use]
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    async fn entries(&self) -> io::Result<Vec<(PathBuf, bool)>> {
        let mut dir = tokio::fs::read_dir(&self.build_dir).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let is_dir = entry.file_type().await?.is_dir();
            entries.push((entry.path(), is_dir));
        }
        entries.sort();
        Ok(entries)
    }
}

#[async_trait]
impl Stage for CleanStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext) -> StageResult {
        let started = Instant::now();
        let io_failure = |e: io::Error, diagnostics: Vec<DiagnosticEvent>| {
            let failure = StageFailure::new(&self.name, StageFailureKind::Io, e.to_string());
            StageResult::from_failure(failure, diagnostics, started.elapsed())
        };

        let entries = match self.entries().await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let note = DiagnosticEvent::info(format!("{} does not exist; nothing to clean", self.build_dir.display()));
                return StageResult::succeeded(&self.name, vec![note], started.elapsed());
            }
            Err(e) => return io_failure(e, Vec::new()),
        };

        let mut diagnostics = Vec::with_capacity(entries.len());
        for (path, is_dir) in entries {
            if ctx.cancel.is_cancelled() {
                let failure = StageFailure::cancelled(&self.name, ctx.cancel_message());
                return StageResult::from_failure(failure, diagnostics, started.elapsed());
            }

            let name = path.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned());
            let removed = if is_dir {
                diagnostics.push(DiagnosticEvent::info(format!("deleting {name} directory tree")));
                tokio::fs::remove_dir_all(&path).await
            } else {
                diagnostics.push(DiagnosticEvent::info(format!("deleting {name}")));
                tokio::fs::remove_file(&path).await
            };
            if let Err(e) = removed {
                return io_failure(e, diagnostics);
            }
        }

        info!(stage = %self.name, dir = %self.build_dir.display(), removed = diagnostics.len(), "Build directory cleaned");
        StageResult::succeeded(&self.name, diagnostics, started.elapsed())
    }
}
