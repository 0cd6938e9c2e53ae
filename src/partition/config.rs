//! Partition configuration
//!
//! Immutable descriptor of one partition. Changing any of it means dropping
//! the partition and creating it again.

use crate::config::WalSyncStrategy;

use super::PartitionId;

/// Descriptor of one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePartitionConfig {
    store_name: String,
    partition_id: PartitionId,
    read_only: bool,
    options: PartitionOptions,
}

/// Backend-specific overrides; unset fields use the store's defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionOptions {
    /// Durable backend: WAL fsync policy for this partition
    pub wal_sync_strategy: Option<WalSyncStrategy>,

    /// Durable backend: WAL size that triggers a checkpoint
    pub checkpoint_threshold_bytes: Option<u64>,
}

impl StoragePartitionConfig {
    /// Writable partition with default options
    pub fn new(store_name: impl Into<String>, partition_id: PartitionId) -> Self {
        Self::builder(store_name, partition_id).build()
    }

    pub fn builder(
        store_name: impl Into<String>,
        partition_id: PartitionId,
    ) -> StoragePartitionConfigBuilder {
        StoragePartitionConfigBuilder {
            config: Self {
                store_name: store_name.into(),
                partition_id,
                read_only: false,
                options: PartitionOptions::default(),
            },
        }
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn options(&self) -> &PartitionOptions {
        &self.options
    }
}

/// Builder for StoragePartitionConfig
pub struct StoragePartitionConfigBuilder {
    config: StoragePartitionConfig,
}

impl StoragePartitionConfigBuilder {
    /// Reject put/delete on this partition
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.options.wal_sync_strategy = Some(strategy);
        self
    }

    pub fn checkpoint_threshold_bytes(mut self, bytes: u64) -> Self {
        self.config.options.checkpoint_threshold_bytes = Some(bytes);
        self
    }

    pub fn build(self) -> StoragePartitionConfig {
        self.config
    }
}
