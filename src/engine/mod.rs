//! Engine Module
//!
//! The storage engine for one store: owns its partitions and routes
//! operations to them.
//!
//! ## Responsibilities
//! - Create, drop and look up partitions
//! - Route get/put/delete/iterate to the owning partition
//! - Recover persisted partitions on startup
//! - Stage and atomically publish transferred partitions
//!
//! ## Engine States
//! ```text
//! Open ──close()──► Closed   (terminal)
//! ```

mod backend;
mod durable;
mod memory;
mod registry;
mod staging;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::iterator::{EntriesIterator, KeysIterator};
use crate::partition::{Partition, PartitionId, PartitionState, StoragePartitionConfig};
use crate::persistence::PersistenceType;

pub use backend::StorageBackend;
pub use durable::{DurableBackend, DurablePartition};
pub use memory::{InMemoryBackend, InMemoryPartition};
pub use registry::{StoreRegistry, StoreStatus};
pub use staging::StagingPartition;

/// Lifecycle state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Open,
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Open => f.write_str("OPEN"),
            EngineState::Closed => f.write_str("CLOSED"),
        }
    }
}

/// Storage engine for one store
///
/// ## Concurrency
/// - `partitions`: RwLock held only to look up or change the map; the
///   `Arc<Partition>` is cloned out and the lock released before the
///   operation runs, so different partitions never contend
/// - `lifecycle`: one mutex per partition id, held across the backend I/O of
///   create, drop and publish so that those never interleave for one id.
///   The map lock is never held during backend I/O.
/// - No ordering is imposed between concurrent writers to the same key
pub struct StorageEngine {
    store_name: String,
    backend: Arc<dyn StorageBackend>,
    partitions: RwLock<HashMap<PartitionId, Arc<Partition>>>,
    lifecycle: Mutex<HashMap<PartitionId, Arc<Mutex<()>>>>,
    state: RwLock<EngineState>,
    /// Persisted partitions that failed to reopen at startup
    unrecovered: RwLock<BTreeSet<PartitionId>>,
    next_staging_session: AtomicU64,
}

impl StorageEngine {
    /// Open the engine for a store, building the configured backend
    ///
    /// On startup (durable stores):
    /// 1. Remove staging leftovers from an interrupted transfer
    /// 2. Reopen every persisted partition as `Active`
    pub fn open(config: StoreConfig) -> Result<Self> {
        if config.store_name.is_empty() {
            return Err(StoreError::Config("store name must not be empty".to_string()));
        }

        let backend: Arc<dyn StorageBackend> = match config.persistence_type {
            PersistenceType::InMemory => Arc::new(InMemoryBackend::new()),
            PersistenceType::Durable => Arc::new(DurableBackend::open(&config)?),
        };

        Self::with_backend(config.store_name, backend)
    }

    /// Shorthand for a non-persistent engine
    pub fn in_memory(store_name: impl Into<String>) -> Result<Self> {
        Self::open(StoreConfig::builder(store_name).build())
    }

    /// Open the engine over an already constructed backend
    pub fn with_backend(store_name: String, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let engine = Self {
            store_name,
            backend,
            partitions: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(HashMap::new()),
            state: RwLock::new(EngineState::Open),
            unrecovered: RwLock::new(BTreeSet::new()),
            next_staging_session: AtomicU64::new(1),
        };

        let leftovers = engine.backend.clear_staging()?;
        if leftovers > 0 {
            tracing::warn!(
                store = %engine.store_name,
                leftovers,
                "Removed staging partitions left by an interrupted transfer"
            );
        }

        engine.restore_partitions()?;

        tracing::info!(
            store = %engine.store_name,
            persistence = %engine.persistence_type(),
            partitions = engine.partition_count(),
            "Storage engine opened"
        );
        Ok(engine)
    }

    // =========================================================================
    // Backend Information
    // =========================================================================

    /// Backend type; fixed for the engine's lifetime
    pub fn persistence_type(&self) -> PersistenceType {
        self.backend.persistence_type()
    }

    /// Partition ids recoverable from stable media
    ///
    /// Always empty for in-memory stores. Partitions whose files could not be
    /// reopened are left out so that callers bootstrap them from scratch.
    pub fn persisted_partition_ids(&self) -> Result<BTreeSet<PartitionId>> {
        self.ensure_open()?;
        let mut ids = self.backend.persisted_partition_ids()?;
        for id in self.unrecovered.read().iter() {
            ids.remove(id);
        }
        Ok(ids)
    }

    // =========================================================================
    // Partition Lifecycle
    // =========================================================================

    /// Create a fresh, empty partition
    ///
    /// Fails with `PartitionAlreadyExists` if the id is registered; a failed
    /// create registers nothing.
    pub fn create_storage_partition(
        &self,
        config: &StoragePartitionConfig,
    ) -> Result<Arc<Partition>> {
        self.check_config(config)?;
        let id = config.partition_id();

        let lock = self.lifecycle_lock(id);
        let _lifecycle = lock.lock();
        self.ensure_open()?;
        if self.contains_partition(id) {
            return Err(self.already_exists(id));
        }

        let inner = self.backend.create_partition(config)?;
        let partition = Arc::new(Partition::new(config.clone(), inner));
        partition.activate();
        self.register(id, &partition)?;

        tracing::info!(
            store = %self.store_name,
            partition = id,
            read_only = config.is_read_only(),
            "Created partition"
        );
        Ok(partition)
    }

    /// Drop a partition and delete its data
    ///
    /// Idempotent: unknown or already dropped ids are a no-op. Safe to retry
    /// after a failure; data deletion runs again each time.
    pub fn drop_storage_partition(&self, partition_id: PartitionId) -> Result<()> {
        self.ensure_open()?;

        let lock = self.lifecycle_lock(partition_id);
        let _lifecycle = lock.lock();
        let removed = self.partitions.write().remove(&partition_id);
        if let Some(partition) = &removed {
            partition.mark_dropped()?;
        }
        self.backend.purge_partition(partition_id)?;
        self.unrecovered.write().remove(&partition_id);

        if removed.is_some() {
            tracing::info!(store = %self.store_name, partition = partition_id, "Dropped partition");
        } else {
            tracing::debug!(
                store = %self.store_name,
                partition = partition_id,
                "Drop of unknown partition ignored"
            );
        }
        Ok(())
    }

    /// Look up an active partition
    pub fn partition(&self, partition_id: PartitionId) -> Result<Arc<Partition>> {
        self.ensure_open()?;
        self.partitions
            .read()
            .get(&partition_id)
            .cloned()
            .ok_or_else(|| StoreError::partition_not_found(&self.store_name, partition_id))
    }

    pub fn contains_partition(&self, partition_id: PartitionId) -> bool {
        self.partitions.read().contains_key(&partition_id)
    }

    /// Registered partition ids, ascending
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        let mut ids: Vec<PartitionId> = self.partitions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.read().len()
    }

    // =========================================================================
    // Key-Value Operations
    // =========================================================================

    pub fn get(&self, partition_id: PartitionId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.partition(partition_id)?.get(key)
    }

    pub fn put(&self, partition_id: PartitionId, key: &[u8], value: &[u8]) -> Result<()> {
        self.partition(partition_id)?.put(key, value)
    }

    pub fn delete(&self, partition_id: PartitionId, key: &[u8]) -> Result<()> {
        self.partition(partition_id)?.delete(key)
    }

    pub fn contains_key(&self, partition_id: PartitionId, key: &[u8]) -> Result<bool> {
        self.partition(partition_id)?.contains_key(key)
    }

    pub fn keys(&self, partition_id: PartitionId) -> Result<KeysIterator> {
        self.partition(partition_id)?.keys()
    }

    pub fn entries(&self, partition_id: PartitionId) -> Result<EntriesIterator> {
        self.partition(partition_id)?.entries()
    }

    pub fn sync(&self, partition_id: PartitionId) -> Result<()> {
        self.partition(partition_id)?.sync()
    }

    /// Sync every active partition; reports the first failure after trying all
    pub fn sync_all(&self) -> Result<()> {
        self.ensure_open()?;
        let partitions: Vec<_> = self.partitions.read().values().cloned().collect();
        let mut first_err = None;
        for partition in partitions {
            if let Err(e) = partition.sync() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Staging
    // =========================================================================

    /// Allocate a partition that receives a transfer before it is visible
    pub fn create_staging_partition(
        &self,
        config: &StoragePartitionConfig,
    ) -> Result<StagingPartition> {
        self.check_config(config)?;
        self.ensure_open()?;

        let id = config.partition_id();
        if self.contains_partition(id) {
            return Err(self.already_exists(id));
        }

        let session = self.next_staging_session.fetch_add(1, Ordering::SeqCst);
        let inner = self.backend.create_staging_partition(config, session)?;

        tracing::debug!(store = %self.store_name, partition = id, session, "Created staging partition");
        Ok(StagingPartition::new(
            config.clone(),
            session,
            Arc::clone(&self.backend),
            inner,
        ))
    }

    /// Atomically make a staged partition addressable
    ///
    /// Fails with `PartitionAlreadyExists` if the id became active meanwhile;
    /// the staged data is then discarded.
    pub fn publish_staging(&self, mut staging: StagingPartition) -> Result<Arc<Partition>> {
        let id = staging.partition_id();
        let config = staging.config().clone();

        let lock = self.lifecycle_lock(id);
        let _lifecycle = lock.lock();
        self.ensure_open()?;
        if self.contains_partition(id) {
            return Err(self.already_exists(id));
        }

        let staged = staging.take_inner()?;
        let inner = self
            .backend
            .promote_staging_partition(&config, staging.session(), staged)?;

        let partition = Arc::new(Partition::new(config, inner));
        partition.activate();
        self.register(id, &partition)?;

        tracing::info!(
            store = %self.store_name,
            partition = id,
            session = staging.session(),
            "Published staged partition"
        );
        Ok(partition)
    }

    // =========================================================================
    // Close / Monitoring
    // =========================================================================

    /// Close every active partition and the engine
    ///
    /// Later operations fail with `EngineClosed`; closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state == EngineState::Closed {
                return Ok(());
            }
            *state = EngineState::Closed;
        }

        let partitions: Vec<_> = self.partitions.write().drain().map(|(_, p)| p).collect();
        let count = partitions.len();

        let mut first_err = None;
        for partition in partitions {
            if let Err(e) = partition.close() {
                tracing::error!(
                    store = %self.store_name,
                    partition = partition.partition_id(),
                    error = %e,
                    "Failed to close partition"
                );
                first_err.get_or_insert(e);
            }
        }

        tracing::info!(store = %self.store_name, partitions = count, "Storage engine closed");
        first_err.map_or(Ok(()), Err)
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == EngineState::Open
    }

    /// State of every registered partition
    pub fn partition_states(&self) -> BTreeMap<PartitionId, PartitionState> {
        self.partitions
            .read()
            .iter()
            .map(|(id, p)| (*id, p.state()))
            .collect()
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn restore_partitions(&self) -> Result<()> {
        let ids = self.backend.persisted_partition_ids()?;
        let mut partitions = self.partitions.write();

        for id in ids {
            let config = StoragePartitionConfig::new(self.store_name.clone(), id);
            match self.backend.open_persisted_partition(&config) {
                Ok(inner) => {
                    let partition = Arc::new(Partition::new(config, inner));
                    partition.activate();
                    partitions.insert(id, partition);
                    tracing::debug!(store = %self.store_name, partition = id, "Restored partition");
                }
                Err(e) => {
                    tracing::error!(
                        store = %self.store_name,
                        partition = id,
                        error = %e,
                        "Failed to restore partition; it must be bootstrapped again"
                    );
                    self.unrecovered.write().insert(id);
                }
            }
        }
        Ok(())
    }

    fn lifecycle_lock(&self, partition_id: PartitionId) -> Arc<Mutex<()>> {
        Arc::clone(self.lifecycle.lock().entry(partition_id).or_default())
    }

    /// Make a freshly built partition addressable
    ///
    /// Callers hold the id's lifecycle lock. If the engine closed while the
    /// partition was being built, its data is deleted and nothing is
    /// registered.
    fn register(&self, partition_id: PartitionId, partition: &Arc<Partition>) -> Result<()> {
        {
            let mut partitions = self.partitions.write();
            if self.is_open() {
                partitions.insert(partition_id, Arc::clone(partition));
                self.unrecovered.write().remove(&partition_id);
                return Ok(());
            }
        }

        partition.mark_dropped()?;
        self.backend.purge_partition(partition_id)?;
        Err(StoreError::EngineClosed {
            store: self.store_name.clone(),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        match *self.state.read() {
            EngineState::Open => Ok(()),
            EngineState::Closed => Err(StoreError::EngineClosed {
                store: self.store_name.clone(),
            }),
        }
    }

    fn check_config(&self, config: &StoragePartitionConfig) -> Result<()> {
        if config.store_name() != self.store_name {
            return Err(StoreError::Config(format!(
                "partition config for store {} given to engine of store {}",
                config.store_name(),
                self.store_name
            )));
        }
        Ok(())
    }

    fn already_exists(&self, partition_id: PartitionId) -> StoreError {
        StoreError::PartitionAlreadyExists {
            store: self.store_name.clone(),
            partition: partition_id,
        }
    }
}

impl fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEngine")
            .field("store", &self.store_name)
            .field("persistence", &self.persistence_type())
            .field("state", &self.state())
            .field("partitions", &self.partition_ids())
            .finish()
    }
}
