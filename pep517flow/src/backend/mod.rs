//! PEP 517 build backends.
//!
//! A project's `pyproject.toml` names its backend in
//! `[build-system].build-backend`. The [`BackendRegistry`] maps that name to
//! a [`BuildBackend`] describing how to drive it: which frontend command
//! to run, where artifacts land and which output classifier understands it.

mod pypa;
mod pyproject;

pub use pypa::PypaBuildBackend;
pub use pyproject::{discover_project_file, PyProject, PYPROJECT_FILE};

use crate::classify::Pep517Classifier;
use crate::errors::BackendError;
use crate::process::CommandTemplate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which distributions a build produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    /// A source distribution.
    Sdist,
    /// A binary wheel.
    Wheel,
    /// Both a source distribution and a wheel.
    #[default]
    Both,
}

impl BuildType {
    /// The frontend argument that selects this build type, if any.
    #[must_use]
    pub fn backend_arg(self) -> Option<String> {
        match self {
            Self::Sdist => Some("--sdist".to_string()),
            Self::Wheel => Some("--wheel".to_string()),
            Self::Both => None,
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sdist => write!(f, "sdist"),
            Self::Wheel => write!(f, "wheel"),
            Self::Both => write!(f, "sdist and wheel"),
        }
    }
}

/// Describes how to drive one PEP 517 frontend.
///
/// Command templates may use `{python}`, `{venv}`, `{project_root}`,
/// `{target_dir}` and `{backend_arg}`.
pub trait BuildBackend: Send + Sync + fmt::Debug {
    /// Stable identifier.
    fn id(&self) -> &str;

    /// Name shown to the user.
    fn display_name(&self) -> &str;

    /// Distribution types this backend can produce.
    fn build_types(&self) -> &[BuildType];

    /// Name of the artifact directory, relative to the project root.
    fn builddir_name(&self) -> &str {
        "dist"
    }

    /// The artifact directory for a project.
    fn builddir(&self, root: &Path) -> PathBuf {
        root.join(self.builddir_name())
    }

    /// Gitignore-style globs for files the backend writes into the source
    /// tree as a side effect of building. They are left out of staleness
    /// checks.
    fn byproducts(&self) -> &[&str] {
        &[]
    }

    /// The build command. `{backend_arg}` receives `build_type`'s selection
    /// argument.
    fn build_argv(&self, build_type: BuildType) -> CommandTemplate;

    /// A backend-specific clean command. Without one, cleaning empties the
    /// artifact directory.
    fn clean_argv(&self) -> Option<CommandTemplate> {
        None
    }

    /// True if the frontend builds in its own isolated environment. Backends
    /// without isolation run from the project's virtual environment.
    fn has_isolation(&self) -> bool;

    /// Identifier of the output classifier that understands this backend.
    fn classifier_id(&self) -> &str {
        Pep517Classifier::ID
    }

    /// Returns true if `build_type` is supported.
    fn supports(&self, build_type: BuildType) -> bool {
        self.build_types().contains(&build_type)
    }
}

/// Backends keyed by `build-backend` identifier.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn BuildBackend>>,
}

/// `build-backend` values driven through the pypa frontend by default.
const PYPA_BACKENDS: &[&str] = &[
    "setuptools.build_meta",
    "setuptools.build_meta:__legacy__",
    "flit_core.buildapi",
    "hatchling.build",
    "poetry.core.masonry.api",
    "pdm.backend",
];

impl Default for BackendRegistry {
    fn default() -> Self {
        let pypa: Arc<dyn BuildBackend> = Arc::new(PypaBuildBackend::new());
        let mut registry = Self::empty();
        for id in PYPA_BACKENDS {
            registry.register(*id, Arc::clone(&pypa));
        }
        registry
    }
}

impl BackendRegistry {
    /// Creates a registry with the default backends.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Registers a backend for a `build-backend` identifier.
    pub fn register(&mut self, build_backend: impl Into<String>, backend: Arc<dyn BuildBackend>) {
        self.backends.insert(build_backend.into(), backend);
    }

    /// Resolves a `build-backend` identifier.
    pub fn resolve(&self, build_backend: &str) -> Result<Arc<dyn BuildBackend>, BackendError> {
        self.backends
            .get(build_backend)
            .cloned()
            .ok_or_else(|| BackendError::UnsupportedBackend(build_backend.to_string()))
    }

    /// Returns the registered identifiers, sorted.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.backends.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
