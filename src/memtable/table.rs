//! MemTable implementation
//!
//! Copy-on-write BTreeMap with an approximate byte size.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::iterator::{CursorTable, EntriesIterator, KeysIterator, PartitionSnapshot};

/// In-memory table for one partition
pub struct MemTable {
    /// Current contents; shared with open snapshots
    data: RwLock<PartitionSnapshot>,

    /// Approximate size in bytes (sum of key and value lengths)
    size: AtomicUsize,

    /// Cursors handed out by `keys()` / `entries()`
    cursors: Arc<CursorTable>,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self::from_map(BTreeMap::new())
    }

    /// Build a MemTable from recovered contents
    pub fn from_map(map: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        let size = map.iter().map(|(k, v)| k.len() + v.len()).sum();
        Self {
            data: RwLock::new(Arc::new(map)),
            size: AtomicUsize::new(size),
            cursors: CursorTable::new(),
        }
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.data.read().contains_key(key)
    }

    /// Insert or overwrite a key. Returns the new approximate size.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> usize {
        let mut data = self.data.write();
        let key_len = key.len();
        let added = key_len + value.len();
        let removed = match Arc::make_mut(&mut *data).insert(key, value) {
            Some(old) => key_len + old.len(),
            None => 0,
        };
        self.adjust_size(added, removed)
    }

    /// Remove a key if present. Returns the new approximate size.
    pub fn delete(&self, key: &[u8]) -> usize {
        let mut data = self.data.write();
        if !data.contains_key(key) {
            return self.size();
        }
        let removed = Arc::make_mut(&mut *data)
            .remove(key)
            .map(|old| key.len() + old.len())
            .unwrap_or(0);
        self.adjust_size(0, removed)
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Point-in-time view of the contents
    pub fn snapshot(&self) -> PartitionSnapshot {
        Arc::clone(&*self.data.read())
    }

    /// Iterate over all entries in key order
    pub fn entries(&self) -> EntriesIterator {
        EntriesIterator::new(self.snapshot(), self.cursors.acquire())
    }

    /// Iterate over all keys in order
    pub fn keys(&self) -> KeysIterator {
        KeysIterator::new(self.snapshot(), self.cursors.acquire())
    }

    /// Number of iterators that have not been released
    pub fn open_cursors(&self) -> usize {
        self.cursors.open_cursors()
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut data = self.data.write();
        *data = Arc::new(BTreeMap::new());
        self.size.store(0, Ordering::SeqCst);
    }

    // Called with the write lock held
    fn adjust_size(&self, added: usize, removed: usize) -> usize {
        let current = self.size.load(Ordering::SeqCst);
        let updated = (current + added).saturating_sub(removed);
        self.size.store(updated, Ordering::SeqCst);
        updated
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
