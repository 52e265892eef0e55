//! Content-hash staleness oracle.

use super::BuildFingerprint;
use crate::errors::PlanError;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What a staleness check looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessInputs {
    /// The build configuration file (`pyproject.toml`).
    pub config_file: PathBuf,
    /// The project source root.
    pub source_root: PathBuf,
    /// Paths left out of the source tree signal, typically stage outputs.
    /// Relative paths are resolved against `source_root`.
    pub excluded: Vec<PathBuf>,
    /// Gitignore-style globs left out of the source tree signal, matched
    /// relative to `source_root`. Build byproducts such as `*.egg-info`.
    pub excluded_globs: Vec<String>,
}

impl StalenessInputs {
    /// Creates inputs for a configuration file and source root.
    #[must_use]
    pub fn new(config_file: impl Into<PathBuf>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            source_root: source_root.into(),
            excluded: Vec::new(),
            excluded_globs: Vec::new(),
        }
    }

    /// Excludes a path from the source tree signal.
    #[must_use]
    pub fn with_excluded(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    /// Excludes every source entry matching a gitignore-style glob.
    #[must_use]
    pub fn with_excluded_glob(mut self, glob: impl Into<String>) -> Self {
        self.excluded_globs.push(glob.into());
        self
    }

    fn resolved_exclusions(&self) -> Vec<PathBuf> {
        self.excluded
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { self.source_root.join(p) })
            .collect()
    }
}

/// The answer to a staleness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessVerdict {
    /// True if the stage has to run.
    pub stale: bool,
    /// The fingerprint of the current inputs.
    pub fingerprint: BuildFingerprint,
}

/// Decides whether recorded build outputs still match the current inputs.
///
/// Implementations must be deterministic for identical inputs and must not
/// touch the filesystem other than to read it.
pub trait StalenessOracle: Send + Sync + Debug {
    /// Computes the fingerprint of the current inputs.
    ///
    /// Fails with [`PlanError::ConfigUnreadable`] when the configuration file
    /// cannot be read.
    fn fingerprint(&self, inputs: &StalenessInputs) -> Result<BuildFingerprint, PlanError>;

    /// Compares the current inputs against `previous`. Without a previous
    /// fingerprint the stage is always stale.
    fn is_stale(
        &self,
        previous: Option<&BuildFingerprint>,
        inputs: &StalenessInputs,
    ) -> Result<StalenessVerdict, PlanError> {
        let fingerprint = self.fingerprint(inputs)?;
        let stale = previous != Some(&fingerprint);
        Ok(StalenessVerdict { stale, fingerprint })
    }
}

/// Fingerprints the configuration bytes plus a recursive content hash of the
/// source tree.
///
/// Files are visited in sorted relative-path order and both the normalised
/// path and the content are hashed, so renames count as changes. Hidden and
/// gitignored entries are skipped, as are excluded paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHashOracle;

/// Hashed in place of a file that vanished or became unreadable mid-walk.
const UNREADABLE_MARKER: &[u8] = b"\0unreadable\0";

impl ContentHashOracle {
    /// Creates a new oracle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Turns exclusion globs into walker overrides. Every glob is negated, so
    /// unmatched entries keep the default hidden and gitignore rules.
    fn exclusion_overrides(root: &Path, globs: &[String]) -> Result<Override, PlanError> {
        let invalid = |pattern: &str, e: ignore::Error| PlanError::InvalidExclusion {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        };
        let mut builder = OverrideBuilder::new(root);
        for glob in globs {
            builder.add(&format!("!{glob}")).map_err(|e| invalid(glob, e))?;
        }
        builder.build().map_err(|e| invalid(&globs.join(", "), e))
    }

    fn source_files(root: &Path, excluded: Vec<PathBuf>, overrides: Override) -> Vec<(String, PathBuf)> {
        let mut files: Vec<(String, PathBuf)> = WalkBuilder::new(root)
            .overrides(overrides)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .parents(false)
            .filter_entry(move |entry| !excluded.iter().any(|x| entry.path().starts_with(x)))
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable source entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(|entry| {
                let path = entry.into_path();
                let relative = path.strip_prefix(root).unwrap_or(&path);
                (relative.to_string_lossy().replace('\\', "/"), path.clone())
            })
            .collect();
        files.sort();
        files
    }
}

impl StalenessOracle for ContentHashOracle {
    fn fingerprint(&self, inputs: &StalenessInputs) -> Result<BuildFingerprint, PlanError> {
        let config = std::fs::read(&inputs.config_file).map_err(|e| PlanError::ConfigUnreadable {
            path: inputs.config_file.clone(),
            reason: e.to_string(),
        })?;

        let mut hasher = Sha256::new();
        hasher.update(b"config\0");
        hasher.update(&config);

        if inputs.source_root.is_dir() {
            let overrides = Self::exclusion_overrides(&inputs.source_root, &inputs.excluded_globs)?;
            let files = Self::source_files(&inputs.source_root, inputs.resolved_exclusions(), overrides);
            for (relative, path) in files {
                hasher.update(b"\0file\0");
                hasher.update(relative.as_bytes());
                hasher.update(b"\0");
                match std::fs::read(&path) {
                    Ok(content) => hasher.update(&content),
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Source file unreadable");
                        hasher.update(UNREADABLE_MARKER);
                    }
                }
            }
        }

        Ok(BuildFingerprint::new(hex::encode(hasher.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> (TempDir, StalenessInputs) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("pyproject.toml"), "[build-system]\nbuild-backend = \"setuptools.build_meta\"\n").unwrap();
        fs::create_dir_all(root.join("src/pkg")).unwrap();
        fs::write(root.join("src/pkg/__init__.py"), "VERSION = '1.0'\n").unwrap();
        let inputs = StalenessInputs::new(root.join("pyproject.toml"), root);
        (dir, inputs)
    }

    #[test]
    fn test_first_check_is_stale() {
        let (_dir, inputs) = project();
        let verdict = ContentHashOracle.is_stale(None, &inputs).unwrap();
        assert!(verdict.stale);
        assert_eq!(verdict.fingerprint.as_str().len(), 64);
    }

    #[test]
    fn test_deterministic_for_identical_inputs() {
        let (_dir, inputs) = project();
        let first = ContentHashOracle.is_stale(None, &inputs).unwrap();
        let second = ContentHashOracle.is_stale(Some(&first.fingerprint), &inputs).unwrap();
        let third = ContentHashOracle.is_stale(Some(&first.fingerprint), &inputs).unwrap();

        assert_eq!(first.fingerprint, second.fingerprint);
        assert!(!second.stale);
        assert_eq!(second, third);
    }

    #[test]
    fn test_config_change_is_stale() {
        let (dir, inputs) = project();
        let before = ContentHashOracle.fingerprint(&inputs).unwrap();
        fs::write(dir.path().join("pyproject.toml"), "[build-system]\nrequires = []\n").unwrap();

        assert!(ContentHashOracle.is_stale(Some(&before), &inputs).unwrap().stale);
    }

    #[test]
    fn test_source_change_and_rename_are_stale() {
        let (dir, inputs) = project();
        let before = ContentHashOracle.fingerprint(&inputs).unwrap();

        fs::write(dir.path().join("src/pkg/__init__.py"), "VERSION = '1.1'\n").unwrap();
        let edited = ContentHashOracle.fingerprint(&inputs).unwrap();
        assert_ne!(before, edited);

        fs::rename(dir.path().join("src/pkg/__init__.py"), dir.path().join("src/pkg/main.py")).unwrap();
        let renamed = ContentHashOracle.fingerprint(&inputs).unwrap();
        assert_ne!(edited, renamed);
    }

    #[test]
    fn test_outputs_and_hidden_entries_do_not_perturb() {
        let (dir, inputs) = project();
        let inputs = inputs.with_excluded("dist");
        let before = ContentHashOracle.fingerprint(&inputs).unwrap();

        fs::create_dir_all(dir.path().join("dist")).unwrap();
        fs::write(dir.path().join("dist/pkg-1.0.tar.gz"), b"archive").unwrap();
        fs::create_dir_all(dir.path().join(".venv/bin")).unwrap();
        fs::write(dir.path().join(".venv/bin/python"), b"#!").unwrap();

        assert_eq!(before, ContentHashOracle.fingerprint(&inputs).unwrap());
    }

    #[test]
    fn test_byproduct_globs_do_not_perturb() {
        let (dir, inputs) = project();
        let inputs = inputs.with_excluded_glob("/build").with_excluded_glob("*.egg-info");
        let before = ContentHashOracle.fingerprint(&inputs).unwrap();

        fs::create_dir_all(dir.path().join("src/pkg.egg-info")).unwrap();
        fs::write(dir.path().join("src/pkg.egg-info/PKG-INFO"), "Name: pkg\n").unwrap();
        fs::create_dir_all(dir.path().join("build/lib/pkg")).unwrap();
        fs::write(dir.path().join("build/lib/pkg/__init__.py"), "VERSION = '1.0'\n").unwrap();
        assert_eq!(before, ContentHashOracle.fingerprint(&inputs).unwrap());

        // Anchored globs only match at the root.
        fs::create_dir_all(dir.path().join("src/pkg/build")).unwrap();
        fs::write(dir.path().join("src/pkg/build/helpers.py"), "X = 1\n").unwrap();
        assert_ne!(before, ContentHashOracle.fingerprint(&inputs).unwrap());
    }

    #[test]
    fn test_invalid_exclusion_glob_is_an_error() {
        let (_dir, inputs) = project();
        let inputs = inputs.with_excluded_glob("src/[");

        let err = ContentHashOracle.fingerprint(&inputs).unwrap_err();
        assert!(matches!(err, PlanError::InvalidExclusion { ref pattern, .. } if pattern == "src/["));
        assert_eq!(err.error_info().code, "PLAN-007-EXCLUSION");
    }

    #[test]
    fn test_unreadable_config_is_an_error_not_stale() {
        let (dir, _) = project();
        let inputs = StalenessInputs::new(dir.path().join("missing.toml"), dir.path());

        let err = ContentHashOracle.is_stale(None, &inputs).unwrap_err();
        assert!(matches!(err, PlanError::ConfigUnreadable { .. }));
    }

    #[test]
    fn test_missing_source_root_contributes_nothing() {
        let (dir, _) = project();
        let config = dir.path().join("pyproject.toml");
        let a = ContentHashOracle
            .fingerprint(&StalenessInputs::new(&config, dir.path().join("nope")))
            .unwrap();
        let b = ContentHashOracle
            .fingerprint(&StalenessInputs::new(&config, dir.path().join("also-nope")))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_check_does_not_mutate_tree() {
        let (dir, inputs) = project();
        let list = |p: &Path| {
            let mut names: Vec<_> = fs::read_dir(p).unwrap().map(|e| e.unwrap().file_name()).collect();
            names.sort();
            names
        };
        let before = list(dir.path());
        ContentHashOracle.is_stale(None, &inputs).unwrap();
        assert_eq!(before, list(dir.path()));
    }
}
