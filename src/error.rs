//! Error types for partstore
//!
//! Provides a unified error type for engine and transfer operations.
//!
//! `StoreError` is `Clone`: coalesced transfer sessions hand the same outcome
//! to every waiter, so I/O errors are kept behind an `Arc`.

use std::sync::Arc;

use thiserror::Error;

use crate::partition::PartitionId;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for partstore operations
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    // -------------------------------------------------------------------------
    // Not Found
    // -------------------------------------------------------------------------
    #[error("Store not found: {store}")]
    StoreNotFound { store: String },

    #[error("Partition {partition} not found in store {store}")]
    PartitionNotFound { store: String, partition: PartitionId },

    // -------------------------------------------------------------------------
    // Already Exists
    // -------------------------------------------------------------------------
    #[error("Partition {partition} already exists in store {store}")]
    PartitionAlreadyExists { store: String, partition: PartitionId },

    // -------------------------------------------------------------------------
    // Persistence Errors
    // -------------------------------------------------------------------------
    #[error("Persistence failure on {store}/{partition}: {reason}")]
    PersistenceFailure {
        store: String,
        partition: PartitionId,
        reason: String,
    },

    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("Corrupted data: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Transfer Errors
    // -------------------------------------------------------------------------
    #[error("Transfer failed for {store}/{partition}: {reason}")]
    TransferFailure {
        store: String,
        partition: PartitionId,
        reason: String,
    },

    #[error("Transfer cancelled for {store}/{partition}")]
    Cancelled { store: String, partition: PartitionId },

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Storage engine for store {store} is closed")]
    EngineClosed { store: String },

    #[error("Partition {partition} of store {store} is read-only")]
    ReadOnlyPartition { store: String, partition: PartitionId },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Arc::new(err))
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl StoreError {
    /// True for `StoreNotFound` and `PartitionNotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::StoreNotFound { .. } | StoreError::PartitionNotFound { .. }
        )
    }

    /// True when a failed bootstrap transfer should fall back to log replay.
    ///
    /// A `get` that fails this way left nothing visible in the engine.
    pub fn should_fall_back(&self) -> bool {
        matches!(
            self,
            StoreError::StoreNotFound { .. }
                | StoreError::PartitionNotFound { .. }
                | StoreError::TransferFailure { .. }
                | StoreError::Cancelled { .. }
        )
    }

    /// Tag an I/O or format error with the partition it happened on.
    pub(crate) fn persistence(store: &str, partition: PartitionId, err: StoreError) -> Self {
        match err {
            StoreError::PersistenceFailure { .. } => err,
            other => StoreError::PersistenceFailure {
                store: store.to_string(),
                partition,
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn partition_not_found(store: &str, partition: PartitionId) -> Self {
        StoreError::PartitionNotFound {
            store: store.to_string(),
            partition,
        }
    }

    pub(crate) fn transfer(store: &str, partition: PartitionId, reason: impl Into<String>) -> Self {
        StoreError::TransferFailure {
            store: store.to_string(),
            partition,
            reason: reason.into(),
        }
    }
}
