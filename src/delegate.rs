//! The key-value persistence and status-notification seam.
//!
//! The delegate owns every derived artifact the analyzer persists:
//! interval states, monthly event buckets, and search indices, all under
//! namespaced keys. It is also the sink for status notifications. Two
//! reference implementations ship with the crate: [`MemoryDelegate`]
//! for tests and [`FsDelegate`] for simple embedded deployments.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::status::AnalyzerStatus;

/// Key-value persistence plus status sink.
///
/// Writes are expected to be committed when `persist` returns; the
/// analyzer relies on that for its one-call-per-bucket atomicity. Keys
/// are confined to a single process instance at a time.
#[async_trait]
pub trait AnalyticsDelegate: Send + Sync {
    /// Store `value` under `key`, or clear the key when `value` is `None`.
    async fn persist(&self, key: &str, value: Option<Vec<u8>>) -> Result<(), CollaboratorError>;

    /// Load the value stored under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CollaboratorError>;

    /// Observe an analyzer status transition. The default ignores it.
    fn status_changed(&self, _status: &AnalyzerStatus) {}
}

/// In-memory [`AnalyticsDelegate`] that records the status stream.
#[derive(Debug, Default)]
pub struct MemoryDelegate {
    store: Mutex<BTreeMap<String, Vec<u8>>>,
    statuses: Mutex<Vec<AnalyzerStatus>>,
}

impl MemoryDelegate {
    /// An empty delegate.
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.store
            .lock()
            .expect("delegate mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Whether `key` currently holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.store
            .lock()
            .expect("delegate mutex poisoned")
            .contains_key(key)
    }

    /// The statuses observed so far, in order.
    pub fn statuses(&self) -> Vec<AnalyzerStatus> {
        self.statuses
            .lock()
            .expect("delegate mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl AnalyticsDelegate for MemoryDelegate {
    async fn persist(&self, key: &str, value: Option<Vec<u8>>) -> Result<(), CollaboratorError> {
        let mut store = self.store.lock().expect("delegate mutex poisoned");
        match value {
            Some(bytes) => {
                store.insert(key.to_string(), bytes);
            }
            None => {
                store.remove(key);
            }
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CollaboratorError> {
        let store = self.store.lock().expect("delegate mutex poisoned");
        Ok(store.get(key).cloned())
    }

    fn status_changed(&self, status: &AnalyzerStatus) {
        self.statuses
            .lock()
            .expect("delegate mutex poisoned")
            .push(status.clone());
    }
}

/// File-system [`AnalyticsDelegate`]: one JSON file per key.
///
/// Writes go through the temp-rename pattern so readers never observe a
/// partially written artifact. I/O is blocking; for keystone's small
/// artifacts this stays well under a frame budget, but hosts on a
/// latency-sensitive runtime can wrap calls in `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct FsDelegate {
    base_dir: PathBuf,
}

impl FsDelegate {
    /// A delegate rooted at `base_dir`. The directory is created on
    /// first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys follow the `prefix-YYYYMMDD-YYYYMMDD` layout and are safe
        // as file names.
        self.base_dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl AnalyticsDelegate for FsDelegate {
    async fn persist(&self, key: &str, value: Option<Vec<u8>>) -> Result<(), CollaboratorError> {
        let path = self.path_for(key);
        match value {
            Some(bytes) => {
                std::fs::create_dir_all(&self.base_dir)?;
                let tmp_path = path.with_extension("json.tmp");
                std::fs::write(&tmp_path, &bytes)?;
                std::fs::rename(&tmp_path, &path)?;
            }
            None => match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            },
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CollaboratorError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}
