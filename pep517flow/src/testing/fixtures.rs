//! Project fixtures.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A throwaway python project on disk.
#[derive(Debug)]
pub struct PythonProject {
    dir: TempDir,
}

impl PythonProject {
    /// Creates a setuptools project with one module.
    #[must_use]
    pub fn setuptools() -> Self {
        Self::with_backend("setuptools.build_meta")
    }

    /// Creates a project using `build_backend`.
    #[must_use]
    pub fn with_backend(build_backend: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = Self { dir };
        project.write(
            "pyproject.toml",
            &format!(
                "[build-system]\nrequires = [\"setuptools>=61\"]\nbuild-backend = \"{build_backend}\"\n\n[project]\nname = \"demo\"\nversion = \"1.0\"\n"
            ),
        );
        project.write("src/demo/__init__.py", "VERSION = '1.0'\n");
        project
    }

    /// The project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// The `pyproject.toml` path.
    #[must_use]
    pub fn pyproject(&self) -> PathBuf {
        self.root().join("pyproject.toml")
    }

    /// Writes a file relative to the root, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write fixture file");
    }
}
