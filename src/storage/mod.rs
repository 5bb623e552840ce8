//! Persistent state interfaces and the per-transaction overlay.

pub mod change_set;

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Root key-value storage a transaction's change set overlays.
///
/// Implementations must be thread-safe; writes land as atomic batches
/// produced by [`change_set::ChangeSet::merge`].
pub trait RootStore: Send + Sync {
    /// Retrieves a value by key, returning `None` if the key does not exist.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Applies a batch of writes atomically. `None` values are deletions.
    fn apply_batch(&self, writes: Vec<(Vec<u8>, Option<Vec<u8>>)>);
}

/// In-memory root store used by tests and genesis bootstrap.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RootStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }

    fn apply_batch(&self, writes: Vec<(Vec<u8>, Option<Vec<u8>>)>) {
        let mut data = self.data.lock().unwrap();
        for (key, value) in writes {
            match value {
                Some(value) => {
                    data.insert(key, value);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
    }
}
