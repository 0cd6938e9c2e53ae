//! Transfer client abstraction
//!
//! The manager never talks to peers or blob storage directly. It drives a
//! [`TransferClient`], which knows how to fetch a snapshot stream for a
//! partition and how to upload one.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::partition::PartitionId;

use super::snapshot::{Snapshot, SnapshotMetadata};

/// Pluggable transport for partition snapshots
#[async_trait]
pub trait TransferClient: Send + Sync + 'static {
    /// Reference handed back by a successful upload
    type Token: Clone + fmt::Debug + Send + Sync + 'static;

    /// Prepare the client; called once by the manager's `start`
    async fn start(&self) -> Result<()>;

    /// Open a snapshot stream for a partition
    ///
    /// Reports `StoreNotFound` or `PartitionNotFound` when no source holds a
    /// copy.
    async fn fetch(
        &self,
        store: &str,
        partition: PartitionId,
    ) -> Result<Box<dyn SnapshotSource>>;

    /// Publish a snapshot so that other nodes can fetch it
    async fn upload(
        &self,
        store: &str,
        partition: PartitionId,
        snapshot: Snapshot,
    ) -> Result<Self::Token>;

    /// Release client resources
    async fn close(&self) -> Result<()>;
}

/// Stream of snapshot body chunks
#[async_trait]
pub trait SnapshotSource: Send {
    /// Integrity record the body must match
    fn metadata(&self) -> SnapshotMetadata;

    /// Next chunk of the body; `None` once the stream is exhausted
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

// =============================================================================
// In-memory Source
// =============================================================================

/// Source that serves an already encoded snapshot in fixed-size chunks
#[derive(Debug, Clone)]
pub struct BytesSource {
    metadata: SnapshotMetadata,
    data: Bytes,
    chunk_size: usize,
    offset: usize,
}

impl BytesSource {
    pub fn new(snapshot: Snapshot, chunk_size: usize) -> Self {
        let (metadata, data) = snapshot.into_parts();
        Self::from_parts(metadata, data, chunk_size)
    }

    /// Serve `data` under `metadata` without checking that they agree
    pub fn from_parts(metadata: SnapshotMetadata, data: Bytes, chunk_size: usize) -> Self {
        Self {
            metadata,
            data,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }
}

#[async_trait]
impl SnapshotSource for BytesSource {
    fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.offset..end);
        self.offset = end;
        Ok(Some(chunk))
    }
}
