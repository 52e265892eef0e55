//! Distributions left in the build directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What kind of distribution a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A `.whl` binary distribution.
    Wheel,
    /// A `.tar.gz` source distribution.
    Sdist,
    /// Anything else.
    File,
}

impl ArtifactKind {
    /// Infers the kind from a file name.
    #[must_use]
    pub fn of(path: &Path) -> Self {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if name.ends_with(".whl") {
            Self::Wheel
        } else if name.ends_with(".tar.gz") {
            Self::Sdist
        } else {
            Self::File
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wheel => write!(f, "wheel"),
            Self::Sdist => write!(f, "sdist"),
            Self::File => write!(f, "file"),
        }
    }
}

/// A file produced by the build stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// The inferred distribution kind.
    pub kind: ArtifactKind,
}

impl BuildArtifact {
    /// Creates an artifact, inferring its kind from the file name.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = ArtifactKind::of(&path);
        Self { path, kind }
    }

    /// Returns the file name.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
