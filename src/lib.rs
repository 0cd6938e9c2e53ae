//! # partstore
//!
//! Per-node partitioned storage engine with snapshot-based bootstrap:
//! - Stores split into numbered partitions, each an ordered key-value map
//! - Pluggable backends: in-memory, or durable (WAL + checkpoint)
//! - Snapshot iterators with guaranteed cursor release
//! - Blob transfer manager that bootstraps partitions from peer snapshots
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   BlobTransferManager                        │
//! │        (coalesced get/put sessions, staging, publish)        │
//! └─────────────┬───────────────────────────────┬───────────────┘
//!               │                               │
//!               ▼                               ▼
//! ┌─────────────────────────┐        ┌─────────────────────────┐
//! │      StoreRegistry       │        │     TransferClient      │
//! │  store name → engine     │        │  (FsBlobStore, peers)   │
//! └────────────┬────────────┘        └─────────────────────────┘
//!              │
//!              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                            │
//! │              partition id → Partition                        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  In-memory  │          │   Durable   │
//!   │  MemTable   │          │ WAL + ckpt  │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod persistence;

pub mod iterator;
pub mod memtable;
pub mod partition;
pub mod storage;
pub mod wal;

pub mod engine;
pub mod transfer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{StoreConfig, TransferConfig, TransferOptions, WalSyncStrategy};
pub use engine::{EngineState, StorageEngine, StoreRegistry};
pub use error::{Result, StoreError};
pub use iterator::{EntriesIterator, KeysIterator};
pub use partition::{Partition, PartitionId, PartitionState, StoragePartitionConfig};
pub use persistence::PersistenceType;
pub use transfer::{
    BlobTransferManager, FsBlobStore, Snapshot, SnapshotMetadata, TransferClient,
    TransferDirection,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of partstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
