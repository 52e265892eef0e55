//! Stage declarations.

use crate::stages::Stage;
use std::path::PathBuf;
use std::sync::Arc;

/// Declares a stage and how it relates to the rest of the pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Names of stages that must succeed first, in declaration order.
    pub predecessors: Vec<String>,
    /// Paths the stage writes to. Stages that may run concurrently must not
    /// declare overlapping paths.
    pub target_paths: Vec<PathBuf>,
    /// Key under which the stage's fingerprint is recorded.
    pub idempotency_key: String,
}

impl StageSpec {
    /// Creates a new stage specification. The idempotency key defaults to
    /// the name.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        let name = name.into();
        Self {
            idempotency_key: name.clone(),
            name,
            runner,
            predecessors: Vec::new(),
            target_paths: Vec::new(),
        }
    }

    /// Creates a specification named after the stage itself.
    #[must_use]
    pub fn of(runner: Arc<dyn Stage>) -> Self {
        Self::new(runner.name().to_string(), runner)
    }

    /// Adds a predecessor.
    #[must_use]
    pub fn with_predecessor(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.predecessors.contains(&name) {
            self.predecessors.push(name);
        }
        self
    }

    /// Adds several predecessors.
    #[must_use]
    pub fn with_predecessors(self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        names.into_iter().fold(self, Self::with_predecessor)
    }

    /// Declares a path the stage writes to.
    #[must_use]
    pub fn with_target_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_paths.push(path.into());
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }
}
