//! In-memory backend
//!
//! Non-persistent reference engine. Nothing is written anywhere, so after a
//! restart every partition is gone and `persisted_partition_ids` is empty:
//! callers must always cold-start. Suitable for caches and tests.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::iterator::{EntriesIterator, KeysIterator};
use crate::memtable::MemTable;
use crate::partition::{PartitionId, StoragePartition, StoragePartitionConfig};
use crate::persistence::PersistenceType;

use super::backend::StorageBackend;

/// Backend whose partitions live only in memory
#[derive(Debug, Default)]
pub struct InMemoryBackend;

impl InMemoryBackend {
    pub fn new() -> Self {
        Self
    }
}

impl StorageBackend for InMemoryBackend {
    fn persistence_type(&self) -> PersistenceType {
        PersistenceType::InMemory
    }

    fn persisted_partition_ids(&self) -> Result<BTreeSet<PartitionId>> {
        Ok(BTreeSet::new())
    }

    fn create_partition(
        &self,
        config: &StoragePartitionConfig,
    ) -> Result<Box<dyn StoragePartition>> {
        Ok(Box::new(InMemoryPartition::new(config.partition_id())))
    }

    fn open_persisted_partition(
        &self,
        config: &StoragePartitionConfig,
    ) -> Result<Box<dyn StoragePartition>> {
        // Never called with a real id since nothing is persisted
        self.create_partition(config)
    }

    fn purge_partition(&self, _partition: PartitionId) -> Result<()> {
        Ok(())
    }

    fn create_staging_partition(
        &self,
        config: &StoragePartitionConfig,
        _session: u64,
    ) -> Result<Box<dyn StoragePartition>> {
        self.create_partition(config)
    }

    fn promote_staging_partition(
        &self,
        _config: &StoragePartitionConfig,
        _session: u64,
        staged: Box<dyn StoragePartition>,
    ) -> Result<Box<dyn StoragePartition>> {
        Ok(staged)
    }

    fn discard_staging_partition(
        &self,
        _partition: PartitionId,
        _session: u64,
        staged: Box<dyn StoragePartition>,
    ) -> Result<()> {
        staged.destroy()
    }

    fn clear_staging(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Partition backed by a MemTable only
pub struct InMemoryPartition {
    partition_id: PartitionId,
    memtable: MemTable,
}

impl InMemoryPartition {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            memtable: MemTable::new(),
        }
    }

    /// Approximate bytes held
    pub fn size(&self) -> usize {
        self.memtable.size()
    }
}

impl StoragePartition for InMemoryPartition {
    fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.memtable.put(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.memtable.get(key))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.memtable.delete(key);
        Ok(())
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.memtable.contains_key(key))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
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
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.memtable.clear();
        Ok(())
    }
}
