//! Per-transaction overlay over the root store.
//!
//! Reads consult the overlay first and fall through to the root. Writes stay
//! buffered until [`ChangeSet::merge`] lands them as one atomic batch; a
//! faulted transaction simply drops the set. Nested trigger runtimes share
//! the same set through `Rc<RefCell<_>>`, so a clone of the handle is cheap.

use crate::storage::RootStore;
use crate::virtual_machine::errors::VMError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Buffered creates, updates, and deletes of one transaction.
pub struct ChangeSet {
    base: Arc<dyn RootStore>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    read_only: bool,
}

impl ChangeSet {
    /// Creates an empty overlay over the given root.
    pub fn new(base: Arc<dyn RootStore>) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
            read_only: false,
        }
    }

    /// Creates an overlay that rejects every write. Used for view queries.
    pub fn read_only(base: Arc<dyn RootStore>) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
            read_only: true,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Reads a key, overlay first, root second.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(buffered) = self.writes.get(key) {
            return buffered.clone();
        }
        self.base.get(key)
    }

    /// Buffers a write.
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), VMError> {
        if self.read_only {
            return Err(VMError::ReadOnlyWrite);
        }
        self.writes.insert(key, Some(value));
        Ok(())
    }

    /// Buffers a deletion.
    pub fn delete(&mut self, key: Vec<u8>) -> Result<(), VMError> {
        if self.read_only {
            return Err(VMError::ReadOnlyWrite);
        }
        self.writes.insert(key, None);
        Ok(())
    }

    /// True when any write or deletion is buffered.
    pub fn any(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Drops all buffered writes.
    pub fn discard(&mut self) {
        self.writes.clear();
    }

    /// Commits the buffered writes into the root store as one batch.
    ///
    /// A set that was touched while read-only is a fault, not a commit.
    pub fn merge(&mut self) -> Result<(), VMError> {
        if self.read_only && self.any() {
            return Err(VMError::ReadOnlyWrite);
        }
        let writes = std::mem::take(&mut self.writes);
        self.base.apply_batch(writes.into_iter().collect());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn base_with(entries: &[(&[u8], &[u8])]) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.apply_batch(
            entries
                .iter()
                .map(|(k, v)| (k.to_vec(), Some(v.to_vec())))
                .collect(),
        );
        Arc::new(store)
    }

    #[test]
    fn reads_fall_through_to_root() {
        let base = base_with(&[(b"key", b"value")]);
        let changes = ChangeSet::new(base);
        assert_eq!(changes.get(b"key"), Some(b"value".to_vec()));
        assert_eq!(changes.get(b"missing"), None);
    }

    #[test]
    fn writes_shadow_the_root() {
        let base = base_with(&[(b"key", b"old")]);
        let mut changes = ChangeSet::new(base);
        changes.set(b"key".to_vec(), b"new".to_vec()).unwrap();
        assert_eq!(changes.get(b"key"), Some(b"new".to_vec()));
    }

    #[test]
    fn delete_shadows_the_root() {
        let base = base_with(&[(b"key", b"value")]);
        let mut changes = ChangeSet::new(base);
        changes.delete(b"key".to_vec()).unwrap();
        assert_eq!(changes.get(b"key"), None);
    }

    #[test]
    fn merge_lands_in_root() {
        let base = base_with(&[(b"stale", b"x")]);
        let mut changes = ChangeSet::new(base.clone());
        changes.set(b"fresh".to_vec(), b"1".to_vec()).unwrap();
        changes.delete(b"stale".to_vec()).unwrap();
        changes.merge().unwrap();

        assert_eq!(base.get(b"fresh"), Some(b"1".to_vec()));
        assert_eq!(base.get(b"stale"), None);
        assert!(!changes.any());
    }

    #[test]
    fn discard_leaves_root_untouched() {
        let base = base_with(&[]);
        let mut changes = ChangeSet::new(base.clone());
        changes.set(b"key".to_vec(), b"value".to_vec()).unwrap();
        changes.discard();
        changes.merge().unwrap();
        assert_eq!(base.get(b"key"), None);
    }

    #[test]
    fn read_only_rejects_writes() {
        let base = base_with(&[]);
        let mut changes = ChangeSet::read_only(base);
        assert!(matches!(
            changes.set(b"key".to_vec(), b"value".to_vec()),
            Err(VMError::ReadOnlyWrite)
        ));
        assert!(matches!(
            changes.delete(b"key".to_vec()),
            Err(VMError::ReadOnlyWrite)
        ));
    }

    #[test]
    fn write_after_delete_restores_value() {
        let base = base_with(&[]);
        let mut changes = ChangeSet::new(base);
        changes.set(b"key".to_vec(), b"first".to_vec()).unwrap();
        changes.delete(b"key".to_vec()).unwrap();
        changes.set(b"key".to_vec(), b"second".to_vec()).unwrap();
        assert_eq!(changes.get(b"key"), Some(b"second".to_vec()));
    }
}
