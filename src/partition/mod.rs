//! Partition Module
//!
//! The per-partition key-value contract and the engine-owned handle.
//!
//! ## Lifecycle
//! ```text
//! Created ──► Active ──┬──► Dropped   (terminal)
//!                      └──► Closed    (terminal)
//! ```
//! Only `Active` partitions serve operations; any other state reports
//! `PartitionNotFound`. A persistence failure additionally marks the
//! partition unusable without affecting its neighbours.

mod config;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::error::{Result, StoreError};
use crate::iterator::{EntriesIterator, KeysIterator};

pub use config::{PartitionOptions, StoragePartitionConfig, StoragePartitionConfigBuilder};

/// Partition identifier, unique within a store
pub type PartitionId = u32;

/// Capability set every backend partition implements
///
/// Writes for one key are last-writer-wins in arrival order; callers are
/// responsible for single-writer discipline per partition.
pub trait StoragePartition: Send + Sync {
    fn partition_id(&self) -> PartitionId;

    /// Insert or overwrite a key
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a key; removing an absent key is not an error
    fn delete(&self, key: &[u8]) -> Result<()>;

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Flush to the durable medium (no-op for non-durable backends)
    fn sync(&self) -> Result<()>;

    /// Keys in order, as of this call
    fn keys(&self) -> Result<KeysIterator>;

    /// Entries in key order, as of this call
    fn entries(&self) -> Result<EntriesIterator>;

    /// Number of live keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterators created by this partition and not yet released
    fn open_cursors(&self) -> usize;

    /// Flush and release backend resources, keeping persisted data
    fn close(&self) -> Result<()>;

    /// Release backend resources and discard in-memory data
    fn destroy(&self) -> Result<()>;
}

/// Lifecycle state of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionState {
    Created,
    Active,
    Dropped,
    Closed,
}

impl PartitionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PartitionState::Dropped | PartitionState::Closed)
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PartitionState::Created => "CREATED",
            PartitionState::Active => "ACTIVE",
            PartitionState::Dropped => "DROPPED",
            PartitionState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Partition Handle
// =============================================================================

/// Engine-owned handle around a backend partition
///
/// Operations hold the state read lock while they run, so a drop or close
/// waits for in-flight operations and none start afterwards.
pub struct Partition {
    config: StoragePartitionConfig,
    state: RwLock<PartitionState>,
    /// Set after a persistence failure; never cleared
    unusable: AtomicBool,
    inner: Box<dyn StoragePartition>,
}

impl Partition {
    pub(crate) fn new(config: StoragePartitionConfig, inner: Box<dyn StoragePartition>) -> Self {
        Self {
            config,
            state: RwLock::new(PartitionState::Created),
            unusable: AtomicBool::new(false),
            inner,
        }
    }

    // =========================================================================
    // Key-Value Operations
    // =========================================================================

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _state = self.writable()?;
        self.track(self.inner.put(key, value))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let _state = self.usable()?;
        self.track(self.inner.get(key))
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let _state = self.writable()?;
        self.track(self.inner.delete(key))
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        let _state = self.usable()?;
        self.track(self.inner.contains_key(key))
    }

    pub fn sync(&self) -> Result<()> {
        let _state = self.usable()?;
        self.track(self.inner.sync())
    }

    pub fn keys(&self) -> Result<KeysIterator> {
        let _state = self.usable()?;
        self.track(self.inner.keys())
    }

    pub fn entries(&self) -> Result<EntriesIterator> {
        let _state = self.usable()?;
        self.track(self.inner.entries())
    }

    pub fn len(&self) -> Result<usize> {
        let _state = self.usable()?;
        Ok(self.inner.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn partition_id(&self) -> PartitionId {
        self.config.partition_id()
    }

    pub fn store_name(&self) -> &str {
        self.config.store_name()
    }

    pub fn config(&self) -> &StoragePartitionConfig {
        &self.config
    }

    pub fn state(&self) -> PartitionState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() == PartitionState::Active
    }

    pub fn is_read_only(&self) -> bool {
        self.config.is_read_only()
    }

    /// Whether a persistence failure has taken this partition out of service
    pub fn is_unusable(&self) -> bool {
        self.unusable.load(Ordering::SeqCst)
    }

    pub fn open_cursors(&self) -> usize {
        self.inner.open_cursors()
    }

    // =========================================================================
    // Lifecycle (engine only)
    // =========================================================================

    /// Created → Active
    pub(crate) fn activate(&self) {
        let mut state = self.state.write();
        if *state == PartitionState::Created {
            *state = PartitionState::Active;
        }
    }

    /// Active → Dropped, discarding in-memory data
    pub(crate) fn mark_dropped(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.is_terminal() {
            return Ok(());
        }
        *state = PartitionState::Dropped;
        self.inner.destroy()
    }

    /// Active → Closed, flushing what the backend persists
    pub(crate) fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.is_terminal() {
            return Ok(());
        }
        *state = PartitionState::Closed;
        if self.is_unusable() {
            return Ok(());
        }
        self.inner.close()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn usable(&self) -> Result<RwLockReadGuard<'_, PartitionState>> {
        let state = self.state.read();
        if *state != PartitionState::Active {
            return Err(StoreError::partition_not_found(
                self.store_name(),
                self.partition_id(),
            ));
        }
        if self.is_unusable() {
            return Err(StoreError::PersistenceFailure {
                store: self.store_name().to_string(),
                partition: self.partition_id(),
                reason: "partition is unusable after an earlier persistence failure".to_string(),
            });
        }
        Ok(state)
    }

    fn writable(&self) -> Result<RwLockReadGuard<'_, PartitionState>> {
        let state = self.usable()?;
        if self.is_read_only() {
            return Err(StoreError::ReadOnlyPartition {
                store: self.store_name().to_string(),
                partition: self.partition_id(),
            });
        }
        Ok(state)
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(StoreError::PersistenceFailure { reason, .. }) = &result {
            if !self.unusable.swap(true, Ordering::SeqCst) {
                tracing::error!(
                    store = %self.store_name(),
                    partition = self.partition_id(),
                    %reason,
                    "Persistence failure; partition marked unusable"
                );
            }
        }
        result
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("store", &self.store_name())
            .field("partition", &self.partition_id())
            .field("state", &self.state())
            .field("read_only", &self.is_read_only())
            .field("unusable", &self.is_unusable())
            .finish()
    }
}
