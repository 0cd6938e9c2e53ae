//! Backend capability
//!
//! What a storage backend must provide to the engine. Each backend decides
//! for itself which partitions survive a restart; there is no default.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::partition::{PartitionId, StoragePartition, StoragePartitionConfig};
use crate::persistence::PersistenceType;

/// Per-store storage backend
pub trait StorageBackend: Send + Sync {
    fn persistence_type(&self) -> PersistenceType;

    /// Partition ids recoverable from stable media
    fn persisted_partition_ids(&self) -> Result<BTreeSet<PartitionId>>;

    /// Allocate a fresh, empty partition, replacing any leftover data
    fn create_partition(&self, config: &StoragePartitionConfig)
        -> Result<Box<dyn StoragePartition>>;

    /// Reopen a partition reported by `persisted_partition_ids`
    fn open_persisted_partition(
        &self,
        config: &StoragePartitionConfig,
    ) -> Result<Box<dyn StoragePartition>>;

    /// Delete persisted data for a partition; missing data is not an error
    fn purge_partition(&self, partition: PartitionId) -> Result<()>;

    /// Allocate a partition that is not addressable until promoted
    fn create_staging_partition(
        &self,
        config: &StoragePartitionConfig,
        session: u64,
    ) -> Result<Box<dyn StoragePartition>>;

    /// Move a staged partition to its published location
    fn promote_staging_partition(
        &self,
        config: &StoragePartitionConfig,
        session: u64,
        staged: Box<dyn StoragePartition>,
    ) -> Result<Box<dyn StoragePartition>>;

    /// Throw away a staged partition and everything it wrote
    fn discard_staging_partition(
        &self,
        partition: PartitionId,
        session: u64,
        staged: Box<dyn StoragePartition>,
    ) -> Result<()>;

    /// Remove staging leftovers from an earlier process. Returns how many.
    fn clear_staging(&self) -> Result<usize>;
}
