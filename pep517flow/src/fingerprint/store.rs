//! Fingerprint persistence.

use super::BuildFingerprint;
use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The last recorded fingerprint for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// The fingerprint recorded after the last successful run.
    pub fingerprint: BuildFingerprint,
    /// When it was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl FingerprintRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn now(fingerprint: BuildFingerprint) -> Self {
        Self {
            fingerprint,
            recorded_at: Utc::now(),
        }
    }
}

/// Builds the store key for a stage of the target configured by `config_file`.
#[must_use]
pub fn store_key(config_file: &Path, idempotency_key: &str) -> String {
    format!("{}#{idempotency_key}", config_file.display())
}

/// Key-value storage for fingerprints.
pub trait FingerprintStore: Send + Sync + Debug {
    /// Returns the record stored under `key`.
    fn load(&self, key: &str) -> Option<FingerprintRecord>;

    /// Stores `fingerprint` under `key`, replacing any previous record.
    fn record(&self, key: &str, fingerprint: &BuildFingerprint) -> Result<(), StoreError>;

    /// Removes every record whose key starts with `prefix`. Returns how many
    /// were removed.
    fn forget_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
}

fn retain_without_prefix(records: &mut BTreeMap<String, FingerprintRecord>, prefix: &str) -> usize {
    let before = records.len();
    records.retain(|key, _| !key.starts_with(prefix));
    before - records.len()
}

/// A store that lives for the process only.
#[derive(Debug, Default)]
pub struct InMemoryFingerprintStore {
    records: RwLock<BTreeMap<String, FingerprintRecord>>,
}

impl InMemoryFingerprintStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl FingerprintStore for InMemoryFingerprintStore {
    fn load(&self, key: &str) -> Option<FingerprintRecord> {
        self.records.read().get(key).cloned()
    }

    fn record(&self, key: &str, fingerprint: &BuildFingerprint) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(key.to_string(), FingerprintRecord::now(fingerprint.clone()));
        Ok(())
    }

    fn forget_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        Ok(retain_without_prefix(&mut self.records.write(), prefix))
    }
}

/// A store persisted as a JSON object in a single file.
///
/// The whole file is rewritten on every change through a temporary file and
/// a rename, so a crash mid-write leaves the previous state intact.
#[derive(Debug)]
pub struct JsonFingerprintStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, FingerprintRecord>>,
}

impl JsonFingerprintStore {
    /// Opens the store at `path`.
    ///
    /// A missing file is an empty store. A corrupted file is logged and
    /// treated as empty, which only costs a rebuild.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding corrupted fingerprint store");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        debug!(path = %path.display(), records = records.len(), "Fingerprint store loaded");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &BTreeMap<String, FingerprintRecord>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let content = serde_json::to_string_pretty(records)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl FingerprintStore for JsonFingerprintStore {
    fn load(&self, key: &str) -> Option<FingerprintRecord> {
        self.records.read().get(key).cloned()
    }

    // Changes are written to disk first and only then become visible, so a
    // failed write leaves memory and file in agreement.
    fn record(&self, key: &str, fingerprint: &BuildFingerprint) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let mut next = records.clone();
        next.insert(key.to_string(), FingerprintRecord::now(fingerprint.clone()));
        self.persist(&next)?;
        *records = next;
        Ok(())
    }

    fn forget_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut records = self.records.write();
        let mut next = records.clone();
        let removed = retain_without_prefix(&mut next, prefix);
        if removed > 0 {
            self.persist(&next)?;
            *records = next;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> BuildFingerprint {
        BuildFingerprint::new(s)
    }

    #[test]
    fn test_store_key_format() {
        assert_eq!(store_key(Path::new("/p/pyproject.toml"), "build"), "/p/pyproject.toml#build");
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryFingerprintStore::new();
        assert!(store.load("a#build").is_none());

        store.record("a#build", &fp("1")).unwrap();
        store.record("a#install", &fp("2")).unwrap();
        store.record("b#build", &fp("3")).unwrap();
        assert_eq!(store.load("a#build").unwrap().fingerprint, fp("1"));

        assert_eq!(store.forget_prefix("a#").unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/fingerprints.json");

        let store = JsonFingerprintStore::open(&path).unwrap();
        store.record("/p/pyproject.toml#build", &fp("abc")).unwrap();
        drop(store);

        let reopened = JsonFingerprintStore::open(&path).unwrap();
        let record = reopened.load("/p/pyproject.toml#build").unwrap();
        assert_eq!(record.fingerprint, fp("abc"));
        assert!(record.recorded_at <= Utc::now());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_json_store_forget_prefix_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprints.json");
        let store = JsonFingerprintStore::open(&path).unwrap();
        store.record("x#prepare", &fp("1")).unwrap();
        store.record("x#build", &fp("2")).unwrap();

        assert_eq!(store.forget_prefix("x#").unwrap(), 2);
        assert!(JsonFingerprintStore::open(&path).unwrap().load("x#build").is_none());
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("fingerprints.json");
        let store = JsonFingerprintStore::open(&path).unwrap();
        store.record("a#build", &fp("1")).unwrap();

        // A file where the state directory should be makes every write fail.
        std::fs::remove_dir_all(dir.path().join("state")).unwrap();
        std::fs::write(dir.path().join("state"), "not a directory").unwrap();

        assert!(store.record("a#install", &fp("2")).is_err());
        assert!(store.load("a#install").is_none());
        assert!(store.forget_prefix("a#").is_err());
        assert_eq!(store.load("a#build").unwrap().fingerprint, fp("1"));
    }

    #[test]
    fn test_corrupted_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprints.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFingerprintStore::open(&path).unwrap();
        assert!(store.load("anything").is_none());
    }
}
