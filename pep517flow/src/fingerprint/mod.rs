//! Staleness checks and fingerprint persistence.
//!
//! A [`BuildFingerprint`] summarises a stage's inputs. A stage whose current
//! fingerprint equals the one recorded after its last successful run is up
//! to date and is skipped.

mod oracle;
mod store;

pub use oracle::{ContentHashOracle, StalenessInputs, StalenessOracle, StalenessVerdict};
pub use store::{
    store_key, FingerprintRecord, FingerprintStore, InMemoryFingerprintStore, JsonFingerprintStore,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, comparable summary of build inputs.
///
/// Equal fingerprints mean no rebuild is required.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildFingerprint(String);

impl BuildFingerprint {
    /// Wraps an already computed digest.
    #[must_use]
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Returns the digest as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
