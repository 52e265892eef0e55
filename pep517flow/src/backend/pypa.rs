//! The pypa `build` frontend.

use super::{BuildBackend, BuildType};
use crate::process::CommandTemplate;

/// Drives any PEP 517 backend through `python -m build`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PypaBuildBackend;

impl PypaBuildBackend {
    /// Creates the backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BuildBackend for PypaBuildBackend {
    fn id(&self) -> &str {
        "pypa-build"
    }

    fn display_name(&self) -> &str {
        "Pypa Build"
    }

    fn build_types(&self) -> &[BuildType] {
        &[BuildType::Sdist, BuildType::Wheel, BuildType::Both]
    }

    fn byproducts(&self) -> &[&str] {
        &["/build", "*.egg-info"]
    }

    fn build_argv(&self, _build_type: BuildType) -> CommandTemplate {
        CommandTemplate::new([
            "{python}",
            "-m",
            "build",
            "{backend_arg}",
            "--outdir",
            "{target_dir}",
            "{project_root}",
        ])
    }

    fn has_isolation(&self) -> bool {
        true
    }
}
