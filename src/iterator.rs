//! Partition Iterators
//!
//! Lazy, single-pass iteration over a partition's keys or entries.
//!
//! ## Snapshot semantics
//! An iterator captures the partition's map at creation time. Writes that
//! happen afterwards copy the map instead of mutating the captured one, so an
//! open iterator never observes them.
//!
//! ## Cursor release
//! Every iterator owns a [`CursorGuard`] registered in its partition's
//! [`CursorTable`]. The guard is released when the iterator is exhausted,
//! closed explicitly, or dropped (early abandonment, `?` return, panic).

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;

/// Immutable view of a partition's data
pub type PartitionSnapshot = Arc<BTreeMap<Vec<u8>, Vec<u8>>>;

// =============================================================================
// Cursor Table
// =============================================================================

/// Arena of open cursors for one partition
#[derive(Debug, Default)]
pub struct CursorTable {
    inner: Mutex<CursorArena>,
}

#[derive(Debug, Default)]
struct CursorArena {
    next_id: u64,
    open: HashSet<u64>,
}

impl CursorTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new cursor and return the guard that releases it
    pub fn acquire(self: &Arc<Self>) -> CursorGuard {
        let mut arena = self.inner.lock();
        let id = arena.next_id;
        arena.next_id += 1;
        arena.open.insert(id);

        CursorGuard {
            table: Arc::clone(self),
            id,
            released: false,
        }
    }

    /// Number of cursors currently open
    pub fn open_cursors(&self) -> usize {
        self.inner.lock().open.len()
    }

    fn release(&self, id: u64) {
        self.inner.lock().open.remove(&id);
    }
}

/// Handle for one registered cursor. Releases on drop.
#[derive(Debug)]
pub struct CursorGuard {
    table: Arc<CursorTable>,
    id: u64,
    released: bool,
}

impl CursorGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the cursor; later calls are no-ops
    pub fn release(&mut self) {
        if !self.released {
            self.table.release(self.id);
            self.released = true;
        }
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// Entries Iterator
// =============================================================================

/// Iterator over `(key, value)` pairs in key order
#[derive(Debug)]
pub struct EntriesIterator {
    snapshot: PartitionSnapshot,
    /// Last key handed out; the cursor resumes strictly after it
    position: Option<Vec<u8>>,
    guard: CursorGuard,
}

impl EntriesIterator {
    pub fn new(snapshot: PartitionSnapshot, guard: CursorGuard) -> Self {
        Self {
            snapshot,
            position: None,
            guard,
        }
    }

    /// Close the iterator, releasing its cursor
    pub fn close(mut self) {
        self.guard.release();
    }

    /// Whether the cursor is still registered
    pub fn is_open(&self) -> bool {
        !self.guard.is_released()
    }

    fn advance(&mut self) -> Option<(&Vec<u8>, &Vec<u8>)> {
        if self.guard.is_released() {
            return None;
        }

        let next = match &self.position {
            None => self.snapshot.iter().next(),
            Some(last) => self
                .snapshot
                .range::<[u8], _>((Bound::Excluded(last.as_slice()), Bound::Unbounded))
                .next(),
        };

        match next {
            Some((key, value)) => Some((key, value)),
            None => {
                self.guard.release();
                None
            }
        }
    }
}

impl Iterator for EntriesIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.advance().map(|(k, v)| (k.clone(), v.clone()))?;
        self.position = Some(key.clone());
        Some((key, value))
    }
}

// =============================================================================
// Keys Iterator
// =============================================================================

/// Iterator over keys in key order
pub struct KeysIterator {
    entries: EntriesIterator,
}

impl KeysIterator {
    pub fn new(snapshot: PartitionSnapshot, guard: CursorGuard) -> Self {
        Self {
            entries: EntriesIterator::new(snapshot, guard),
        }
    }

    pub fn close(self) {
        self.entries.close();
    }

    pub fn is_open(&self) -> bool {
        self.entries.is_open()
    }
}

impl Iterator for KeysIterator {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.entries.advance().map(|(k, _)| k.clone())?;
        self.entries.position = Some(key.clone());
        Some(key)
    }
}
