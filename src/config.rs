//! Configuration for partstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::persistence::PersistenceType;

/// Configuration for one store's storage engine
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Store Identity
    // -------------------------------------------------------------------------
    /// Store name, including its version (e.g. `users_v1`)
    pub store_name: String,

    /// Backend used for every partition of this store
    pub persistence_type: PersistenceType,

    // -------------------------------------------------------------------------
    // Durable Backend Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all stores on this node
    /// Internal structure:
    ///   {data_dir}/
    ///     └── {store_name}/
    ///           ├── partition_000000/
    ///           │     ├── wal.log
    ///           │     └── checkpoint.dat
    ///           └── .staging/        (in-progress transfers)
    pub data_dir: PathBuf,

    /// Sync strategy: how often to fsync the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// WAL size (in bytes) that triggers a checkpoint
    pub checkpoint_threshold_bytes: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_name: String::new(),
            persistence_type: PersistenceType::InMemory,
            data_dir: PathBuf::from("./partstore_data"),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            checkpoint_threshold_bytes: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl StoreConfig {
    /// Create a new config builder for the named store
    pub fn builder(store_name: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder {
            config: StoreConfig {
                store_name: store_name.into(),
                ..StoreConfig::default()
            },
        }
    }

    /// Directory holding this store's partitions
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join(&self.store_name)
    }
}

/// Builder for StoreConfig
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the backend type
    pub fn persistence_type(mut self, persistence_type: PersistenceType) -> Self {
        self.config.persistence_type = persistence_type;
        self
    }

    /// Set the data directory (root for all stores)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL size that triggers a checkpoint (in bytes)
    pub fn checkpoint_threshold_bytes(mut self, bytes: u64) -> Self {
        self.config.checkpoint_threshold_bytes = bytes;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}

// =============================================================================
// Transfer Configuration
// =============================================================================

/// Configuration for the blob transfer manager
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Default deadline for a `get` session
    pub get_timeout: Duration,

    /// Default deadline for a `put` session
    pub put_timeout: Duration,

    /// Read size used by streaming transfer clients
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            get_timeout: Duration::from_secs(300),
            put_timeout: Duration::from_secs(300),
            chunk_size: 64 * 1024,
        }
    }
}

impl TransferConfig {
    pub fn builder() -> TransferConfigBuilder {
        TransferConfigBuilder::default()
    }
}

/// Builder for TransferConfig
#[derive(Default)]
pub struct TransferConfigBuilder {
    config: TransferConfig,
}

impl TransferConfigBuilder {
    pub fn get_timeout(mut self, timeout: Duration) -> Self {
        self.config.get_timeout = timeout;
        self
    }

    pub fn put_timeout(mut self, timeout: Duration) -> Self {
        self.config.put_timeout = timeout;
        self
    }

    /// Chunk size is clamped to at least 1 byte
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size.max(1);
        self
    }

    pub fn build(self) -> TransferConfig {
        self.config
    }
}

/// Per-call overrides for a transfer
///
/// A caller joining an in-flight session inherits that session's deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferOptions {
    pub timeout: Option<Duration>,
}

impl TransferOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}
