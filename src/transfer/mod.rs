//! Transfer Module
//!
//! Moves whole partitions between nodes as snapshots.
//!
//! ## Components
//! - [`BlobTransferManager`]: coalesced get/put sessions, staging, publish
//! - [`TransferClient`] / [`SnapshotSource`]: pluggable transport
//! - [`FsBlobStore`]: transport over a shared directory
//! - [`Snapshot`] / [`SnapshotDecoder`]: body format and integrity checks

mod client;
mod fs;
mod manager;
pub mod session;
mod snapshot;

pub use client::{BytesSource, SnapshotSource, TransferClient};
pub use fs::{BlobId, FsBlobStore};
pub use manager::{BlobTransferManager, ManagerState};
pub use session::{SessionKey, SessionState, TransferDirection};
pub use snapshot::{
    Snapshot, SnapshotDecoder, SnapshotMetadata, SNAPSHOT_HEADER_SIZE, SNAPSHOT_MAGIC,
    SNAPSHOT_VERSION,
};
