//! Collaborators a build target is wired with.

use super::HostStageRegistry;
use crate::backend::BackendRegistry;
use crate::classify::ClassifierRegistry;
use crate::config::PipelineConfig;
use crate::errors::Pep517Error;
use crate::events::{DiagnosticsSink, LoggingDiagnosticsSink};
use crate::fingerprint::{
    ContentHashOracle, FingerprintStore, InMemoryFingerprintStore, JsonFingerprintStore, StalenessOracle,
};
use crate::process::{ProcessRunner, TokioProcessRunner};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Everything a [`BuildTarget`](super::BuildTarget) talks to.
///
/// Only the host registry is required. The runner and store default from
/// the pipeline configuration when the target is initialised: a
/// [`TokioProcessRunner`] with the configured grace period, and a JSON
/// store at `state_file` or an in-memory one without it.
#[derive(Clone)]
pub struct TargetServices {
    /// The host's stage graph.
    pub host: Arc<dyn HostStageRegistry>,
    /// Launches backend processes.
    pub runner: Option<Arc<dyn ProcessRunner>>,
    /// Persists fingerprints.
    pub store: Option<Arc<dyn FingerprintStore>>,
    /// Receives per-stage diagnostics.
    pub sink: Arc<dyn DiagnosticsSink>,
    /// Known build backends.
    pub backends: BackendRegistry,
    /// Known output classifiers.
    pub classifiers: ClassifierRegistry,
    /// Decides whether stages are up to date.
    pub oracle: Arc<dyn StalenessOracle>,
}

impl fmt::Debug for TargetServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetServices")
            .field("runner", &self.runner)
            .field("store", &self.store)
            .field("backends", &self.backends)
            .field("oracle", &self.oracle)
            .finish_non_exhaustive()
    }
}

impl TargetServices {
    /// Creates services with default collaborators.
    #[must_use]
    pub fn new(host: Arc<dyn HostStageRegistry>) -> Self {
        Self {
            host,
            runner: None,
            store: None,
            sink: Arc::new(LoggingDiagnosticsSink::new()),
            backends: BackendRegistry::new(),
            classifiers: ClassifierRegistry::new(),
            oracle: Arc::new(ContentHashOracle::new()),
        }
    }

    /// Sets the process runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Sets the fingerprint store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the diagnostics sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the backend registry.
    #[must_use]
    pub fn with_backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    /// Sets the classifier registry.
    #[must_use]
    pub fn with_classifiers(mut self, classifiers: ClassifierRegistry) -> Self {
        self.classifiers = classifiers;
        self
    }

    /// Sets the staleness oracle.
    #[must_use]
    pub fn with_oracle(mut self, oracle: Arc<dyn StalenessOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub(crate) fn resolve(self, config: &PipelineConfig) -> Result<ResolvedServices, Pep517Error> {
        let runner = match self.runner {
            Some(runner) => runner,
            None => Arc::new(TokioProcessRunner::new().with_grace_period(config.grace_period())),
        };
        let store: Arc<dyn FingerprintStore> = match (self.store, &config.state_file) {
            (Some(store), _) => store,
            (None, Some(path)) => {
                debug!(path = %path.display(), "Opening fingerprint store");
                Arc::new(JsonFingerprintStore::open(path)?)
            }
            (None, None) => Arc::new(InMemoryFingerprintStore::new()),
        };
        Ok(ResolvedServices {
            host: self.host,
            runner,
            store,
            sink: self.sink,
            backends: self.backends,
            classifiers: self.classifiers,
            oracle: self.oracle,
        })
    }
}

pub(crate) struct ResolvedServices {
    pub(crate) host: Arc<dyn HostStageRegistry>,
    pub(crate) runner: Arc<dyn ProcessRunner>,
    pub(crate) store: Arc<dyn FingerprintStore>,
    pub(crate) sink: Arc<dyn DiagnosticsSink>,
    pub(crate) backends: BackendRegistry,
    pub(crate) classifiers: ClassifierRegistry,
    pub(crate) oracle: Arc<dyn StalenessOracle>,
}
