//! `pyproject.toml` discovery and parsing.

use crate::errors::{BackendError, Pep517Error, PlanError};
use std::path::{Component, Path, PathBuf};
use toml::{Table, Value};

/// The PEP 517 configuration file name.
pub const PYPROJECT_FILE: &str = "pyproject.toml";

/// Resolves `path` to a `pyproject.toml`: the file itself, or the one inside
/// a directory.
pub fn discover_project_file(path: &Path) -> Result<PathBuf, PlanError> {
    let candidate = if path.is_dir() {
        path.join(PYPROJECT_FILE)
    } else {
        path.to_path_buf()
    };
    if candidate.is_file() {
        Ok(candidate)
    } else {
        Err(PlanError::ConfigUnreadable {
            path: candidate,
            reason: format!("no {PYPROJECT_FILE} found"),
        })
    }
}

/// The parts of `pyproject.toml` the build pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyProject {
    /// The file this was loaded from.
    pub path: PathBuf,
    /// `[build-system].build-backend`.
    pub build_backend: String,
    /// `[build-system].requires`.
    pub requires: Vec<String>,
    /// `[build-system].backend-path`, relative to the project root.
    pub backend_path: Vec<PathBuf>,
    /// `[project].name`.
    pub name: Option<String>,
    /// `[project].version`.
    pub version: Option<String>,
}

impl PyProject {
    /// Reads and parses `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Pep517Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PlanError::ConfigUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self::parse(&content, path)?)
    }

    /// Parses `content` as the `pyproject.toml` at `path`.
    pub fn parse(content: &str, path: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let table: Table =
            toml::from_str(content).map_err(|e| BackendError::InvalidToml(e.message().to_string()))?;

        let build_system = table
            .get("build-system")
            .and_then(Value::as_table)
            .ok_or_else(|| BackendError::NotPep517("missing [build-system] table".into()))?;

        let build_backend = build_system
            .get("build-backend")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::NotPep517("missing build-backend key".into()))?
            .to_string();

        let requires = string_list(build_system, "requires")?;
        let backend_path = string_list(build_system, "backend-path")?
            .into_iter()
            .map(|p| contained_path(&p))
            .collect::<Result<Vec<_>, _>>()?;

        let project = table.get("project").and_then(Value::as_table);
        let field = |key: &str| {
            project
                .and_then(|p| p.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Ok(Self {
            path: path.into(),
            build_backend,
            requires,
            backend_path,
            name: field("name"),
            version: field("version"),
        })
    }

    /// The project root: the directory holding the file.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

fn string_list(table: &Table, key: &str) -> Result<Vec<String>, BackendError> {
    let Some(value) = table.get(key) else {
        return Ok(Vec::new());
    };
    value
        .as_array()
        .and_then(|items| items.iter().map(|v| v.as_str().map(str::to_string)).collect())
        .ok_or_else(|| BackendError::NotPep517(format!("{key} must be a list of strings")))
}

fn contained_path(raw: &str) -> Result<PathBuf, BackendError> {
    let path = PathBuf::from(raw);
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(BackendError::NotPep517(format!(
            "backend-path '{raw}' must stay inside the project root"
        )));
    }
    Ok(path)
}
