//! Durable backend
//!
//! Each partition is a directory holding a checkpoint (full sorted image)
//! and a WAL of the writes applied since that checkpoint. The partition's
//! contents are kept in a MemTable; the files exist to rebuild it.
//!
//! ## Write path
//! 1. Append the operation to the WAL
//! 2. Apply it to the MemTable
//! 3. Checkpoint once the WAL grows past the threshold
//!
//! Steps 1 and 2 happen under the WAL mutex so the WAL order is the order in
//! which writes were applied.
//!
//! ## Recovery
//! Load `checkpoint.dat` (CRC verified), then replay `wal.log`, truncating
//! any torn tail left by a crash.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::config::{StoreConfig, WalSyncStrategy};
use crate::error::{Result, StoreError};
use crate::iterator::{EntriesIterator, KeysIterator};
use crate::memtable::MemTable;
use crate::partition::{PartitionId, StoragePartition, StoragePartitionConfig};
use crate::persistence::PersistenceType;
use crate::storage::checkpoint::{self, sync_dir, CheckpointReader};
use crate::storage::layout::remove_dir_if_exists;
use crate::storage::PartitionLayout;
use crate::wal::{Operation, WalRecovery, WalWriter};

use super::backend::StorageBackend;

/// Staged partitions only need durability once promoted, and promotion
/// checkpoints them, so their WAL is never fsynced on the write path.
const STAGING_SYNC: WalSyncStrategy = WalSyncStrategy::EveryNEntries { count: usize::MAX };

/// Backend that persists partitions under `{data_dir}/{store_name}/`
pub struct DurableBackend {
    store_name: String,
    layout: PartitionLayout,
    wal_sync_strategy: WalSyncStrategy,
    checkpoint_threshold_bytes: u64,
}

impl DurableBackend {
    /// Create the store directory if needed
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let layout = PartitionLayout::new(config.store_dir());
        fs::create_dir_all(layout.store_dir())?;

        Ok(Self {
            store_name: config.store_name.clone(),
            layout,
            wal_sync_strategy: config.wal_sync_strategy,
            checkpoint_threshold_bytes: config.checkpoint_threshold_bytes,
        })
    }

    fn settings(&self, config: &StoragePartitionConfig) -> PartitionSettings {
        let options = config.options();
        PartitionSettings {
            store_name: self.store_name.clone(),
            partition_id: config.partition_id(),
            wal_sync_strategy: options.wal_sync_strategy.unwrap_or(self.wal_sync_strategy),
            checkpoint_threshold_bytes: options
                .checkpoint_threshold_bytes
                .unwrap_or(self.checkpoint_threshold_bytes),
        }
    }

    fn fail(&self, partition: PartitionId, err: StoreError) -> StoreError {
        StoreError::persistence(&self.store_name, partition, err)
    }
}

impl StorageBackend for DurableBackend {
    fn persistence_type(&self) -> PersistenceType {
        PersistenceType::Durable
    }

    fn persisted_partition_ids(&self) -> Result<BTreeSet<PartitionId>> {
        Ok(self.layout.discover()?.into_iter().collect())
    }

    fn create_partition(
        &self,
        config: &StoragePartitionConfig,
    ) -> Result<Box<dyn StoragePartition>> {
        let id = config.partition_id();
        let dir = self.layout.partition_dir(id);

        // Leftovers of an interrupted drop must not leak into a fresh partition
        remove_dir_if_exists(&dir).map_err(|e| self.fail(id, e))?;

        let partition = DurablePartition::create(self.settings(config), dir.clone());
        match partition {
            Ok(p) => Ok(Box::new(p)),
            Err(e) => {
                let _ = remove_dir_if_exists(&dir);
                Err(self.fail(id, e))
            }
        }
    }

    fn open_persisted_partition(
        &self,
        config: &StoragePartitionConfig,
    ) -> Result<Box<dyn StoragePartition>> {
        let id = config.partition_id();
        let dir = self.layout.partition_dir(id);
        let partition =
            DurablePartition::open(self.settings(config), dir).map_err(|e| self.fail(id, e))?;
        Ok(Box::new(partition))
    }

    fn purge_partition(&self, partition: PartitionId) -> Result<()> {
        remove_dir_if_exists(&self.layout.partition_dir(partition))
            .map_err(|e| self.fail(partition, e))
    }

    fn create_staging_partition(
        &self,
        config: &StoragePartitionConfig,
        session: u64,
    ) -> Result<Box<dyn StoragePartition>> {
        let id = config.partition_id();
        let dir = self.layout.staging_dir(id, session);
        let mut settings = self.settings(config);
        settings.wal_sync_strategy = STAGING_SYNC;
        // Checkpointing mid-stream would only slow the transfer down
        settings.checkpoint_threshold_bytes = u64::MAX;

        remove_dir_if_exists(&dir).map_err(|e| self.fail(id, e))?;
        let partition = DurablePartition::create(settings, dir).map_err(|e| self.fail(id, e))?;
        Ok(Box::new(partition))
    }

    fn promote_staging_partition(
        &self,
        config: &StoragePartitionConfig,
        session: u64,
        staged: Box<dyn StoragePartition>,
    ) -> Result<Box<dyn StoragePartition>> {
        let id = config.partition_id();
        let staging_dir = self.layout.staging_dir(id, session);
        let final_dir = self.layout.partition_dir(id);

        let promote = || -> Result<DurablePartition> {
            // Close writes the checkpoint and empties the WAL
            staged.close()?;
            drop(staged);

            remove_dir_if_exists(&final_dir)?;
            fs::rename(&staging_dir, &final_dir)?;
            sync_dir(Some(self.layout.store_dir()))?;

            DurablePartition::open(self.settings(config), final_dir.clone())
        };

        promote().map_err(|e| {
            let _ = remove_dir_if_exists(&staging_dir);
            let _ = remove_dir_if_exists(&final_dir);
            self.fail(id, e)
        })
        .map(|p| Box::new(p) as Box<dyn StoragePartition>)
    }

    fn discard_staging_partition(
        &self,
        partition: PartitionId,
        session: u64,
        staged: Box<dyn StoragePartition>,
    ) -> Result<()> {
        staged.destroy()?;
        drop(staged);
        remove_dir_if_exists(&self.layout.staging_dir(partition, session))
            .map_err(|e| self.fail(partition, e))
    }

    fn clear_staging(&self) -> Result<usize> {
        self.layout.clear_staging()
    }
}

// =============================================================================
// Durable Partition
// =============================================================================

#[derive(Debug, Clone)]
struct PartitionSettings {
    store_name: String,
    partition_id: PartitionId,
    wal_sync_strategy: WalSyncStrategy,
    checkpoint_threshold_bytes: u64,
}

/// Partition persisted as checkpoint + WAL
pub struct DurablePartition {
    settings: PartitionSettings,
    dir: PathBuf,
    memtable: MemTable,
    /// `None` once the partition is closed or destroyed
    wal: Mutex<Option<WalWriter>>,
}

impl DurablePartition {
    /// Create an empty partition in `dir`
    fn create(settings: PartitionSettings, dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let wal = WalWriter::open_at(
            &PartitionLayout::wal_path(&dir),
            settings.wal_sync_strategy,
            1,
        )?;
        sync_dir(dir.parent())?;

        Ok(Self {
            settings,
            dir,
            memtable: MemTable::new(),
            wal: Mutex::new(Some(wal)),
        })
    }

    /// Rebuild a partition from its checkpoint and WAL
    fn open(settings: PartitionSettings, dir: PathBuf) -> Result<Self> {
        let checkpoint_path = PartitionLayout::checkpoint_path(&dir);
        let wal_path = PartitionLayout::wal_path(&dir);

        let entries = if checkpoint_path.exists() {
            CheckpointReader::open(&checkpoint_path)?.into_entries()
        } else {
            Default::default()
        };
        let memtable = MemTable::from_map(entries);

        let mut next_lsn = 1;
        if wal_path.exists() {
            let (entries, result) = WalRecovery::recover(&wal_path)?;
            for entry in entries {
                match entry.operation {
                    Operation::Put { key, value } => {
                        memtable.put(key, value);
                    }
                    Operation::Delete { key } => {
                        memtable.delete(&key);
                    }
                }
            }
            next_lsn = result.last_lsn + 1;

            if result.entries_recovered > 0 || result.was_truncated {
                tracing::debug!(
                    store = %settings.store_name,
                    partition = settings.partition_id,
                    recovered = result.entries_recovered,
                    truncated = result.was_truncated,
                    "Replayed partition WAL"
                );
            }
        }

        let wal = WalWriter::open_at(&wal_path, settings.wal_sync_strategy, next_lsn)?;

        Ok(Self {
            settings,
            dir,
            memtable,
            wal: Mutex::new(Some(wal)),
        })
    }

    /// Write a checkpoint now and empty the WAL
    pub fn checkpoint(&self) -> Result<()> {
        let mut guard = self.wal.lock();
        let wal = self.live_wal(&mut guard)?;
        self.checkpoint_locked(wal).map_err(|e| self.fail(e))
    }

    /// Log `operation`, then apply it with `apply`
    fn append(&self, operation: Operation, apply: impl FnOnce(&MemTable)) -> Result<()> {
        let mut guard = self.wal.lock();
        let wal = self.live_wal(&mut guard)?;

        wal.append(operation).map_err(|e| self.fail(e))?;
        apply(&self.memtable);

        if wal.size_bytes() >= self.settings.checkpoint_threshold_bytes {
            self.checkpoint_locked(wal).map_err(|e| self.fail(e))?;
        }
        Ok(())
    }

    // Called with the WAL mutex held
    fn checkpoint_locked(&self, wal: &mut WalWriter) -> Result<()> {
        let snapshot = self.memtable.snapshot();
        let checkpoint = checkpoint::write_atomic(
            &PartitionLayout::checkpoint_path(&self.dir),
            snapshot.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
        )?;
        wal.truncate()?;

        tracing::debug!(
            store = %self.settings.store_name,
            partition = self.settings.partition_id,
            entries = checkpoint.entry_count,
            bytes = checkpoint.file_size,
            "Checkpoint written"
        );
        Ok(())
    }

    fn live_wal<'a>(&self, guard: &'a mut Option<WalWriter>) -> Result<&'a mut WalWriter> {
        guard.as_mut().ok_or_else(|| {
            StoreError::partition_not_found(&self.settings.store_name, self.settings.partition_id)
        })
    }

    fn fail(&self, err: StoreError) -> StoreError {
        StoreError::persistence(&self.settings.store_name, self.settings.partition_id, err)
    }
}

impl StoragePartition for DurablePartition {
    fn partition_id(&self) -> PartitionId {
        self.settings.partition_id
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let operation = Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        };
        self.append(operation, |memtable| {
            memtable.put(key.to_vec(), value.to_vec());
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.memtable.get(key))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        if !self.memtable.contains_key(key) {
            return Ok(());
        }
        self.append(Operation::Delete { key: key.to_vec() }, |memtable| {
            memtable.delete(key);
        })
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.memtable.contains_key(key))
    }

    fn sync(&self) -> Result<()> {
        let mut guard = self.wal.lock();
        let wal = self.live_wal(&mut guard)?;
        wal.sync().map_err(|e| self.fail(e))
    }

    fn keys(&self) -> Result<KeysIterator> {
        Ok(self.memtable.keys())
    }

    fn entries(&self) -> Result<EntriesIterator> {
        Ok(self.memtable.entries())
    }

    fn len(&self) -> usize {
        self.memtable.entry_count()
    }

    fn open_cursors(&self) -> usize {
        self.memtable.open_cursors()
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.wal.lock();
        if let Some(wal) = guard.as_mut() {
            self.checkpoint_locked(wal).map_err(|e| self.fail(e))?;
            wal.sync().map_err(|e| self.fail(e))?;
        }
        *guard = None;
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        *self.wal.lock() = None;
        self.memtable.clear();
        Ok(())
    }
}
