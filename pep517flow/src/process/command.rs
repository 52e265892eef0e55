//! Backend command specifications and templates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A fully rendered backend invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// The program to run.
    pub program: String,
    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Extra environment variables.
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// Deadline after which the process is terminated as timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Creates a new command.
    #[must_use]
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            timeout: None,
        }
    }

    /// Creates a command from an argv vector. Returns `None` for an empty argv.
    #[must_use]
    pub fn from_argv(argv: Vec<String>, cwd: impl Into<PathBuf>) -> Option<Self> {
        let mut argv = argv.into_iter();
        let program = argv.next()?;
        Some(Self::new(program, cwd).with_args(argv))
    }

    /// Appends arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the command line as the user would type it.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Values substituted into a [`CommandTemplate`].
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    /// `{project_root}`
    pub project_root: PathBuf,
    /// `{target_dir}`
    pub target_dir: PathBuf,
    /// `{backend_arg}`; an argument consisting only of this placeholder is
    /// dropped when unset.
    pub backend_arg: Option<String>,
    /// `{python}`
    pub python: String,
    /// `{venv}`
    pub venv: PathBuf,
}

impl TemplateVars {
    /// Creates template variables for a project.
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            target_dir: target_dir.into(),
            backend_arg: None,
            python: "python3".to_string(),
            venv: PathBuf::from(".venv"),
        }
    }

    /// Sets the backend-selection argument.
    #[must_use]
    pub fn with_backend_arg(mut self, arg: Option<String>) -> Self {
        self.backend_arg = arg;
        self
    }

    /// Sets the interpreter.
    #[must_use]
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Sets the virtual environment directory.
    #[must_use]
    pub fn with_venv(mut self, venv: impl Into<PathBuf>) -> Self {
        self.venv = venv.into();
        self
    }
}

/// An argv template with `{placeholder}` substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    argv: Vec<String>,
}

const BACKEND_ARG: &str = "{backend_arg}";

impl CommandTemplate {
    /// Creates a template from argv parts.
    #[must_use]
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the raw template parts.
    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.argv
    }

    /// Prefixes the program with `dir`, e.g. to run it from a virtual environment.
    #[must_use]
    pub fn with_program_dir(mut self, dir: &Path) -> Self {
        if let Some(program) = self.argv.first_mut() {
            *program = dir.join(&*program).to_string_lossy().into_owned();
        }
        self
    }

    /// Renders the template into argv.
    #[must_use]
    pub fn render(&self, vars: &TemplateVars) -> Vec<String> {
        self.argv
            .iter()
            .filter_map(|part| {
                if part == BACKEND_ARG {
                    return vars.backend_arg.clone();
                }
                let backend_arg = vars.backend_arg.as_deref().unwrap_or_default();
                Some(
                    part.replace("{project_root}", &vars.project_root.to_string_lossy())
                        .replace("{target_dir}", &vars.target_dir.to_string_lossy())
                        .replace("{venv}", &vars.venv.to_string_lossy())
                        .replace("{python}", &vars.python)
                        .replace(BACKEND_ARG, backend_arg),
                )
            })
            .collect()
    }

    /// Renders the template into a command running in `cwd`.
    #[must_use]
    pub fn to_command(&self, vars: &TemplateVars, cwd: impl Into<PathBuf>) -> Option<CommandSpec> {
        CommandSpec::from_argv(self.render(vars), cwd)
    }
}
