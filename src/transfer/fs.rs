//! Filesystem blob store
//!
//! A [`TransferClient`] backed by a directory shared between nodes (a mount
//! or a synced bucket). Layout:
//! ```text
//! {root}/
//!   └── {store_name}/
//!         ├── 7.snap     snapshot body
//!         └── 7.meta     bincode SnapshotMetadata
//! ```
//! The `.meta` file is written last, so a partition is only fetchable once
//! its body is complete.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::TransferConfig;
use crate::error::{Result, StoreError};
use crate::partition::PartitionId;

use super::client::{SnapshotSource, TransferClient};
use super::snapshot::{Snapshot, SnapshotMetadata};

/// Location of an uploaded snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobId {
    pub path: PathBuf,
    pub checksum: u32,
}

/// Transfer client over a shared directory
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    chunk_size: usize,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, config: &TransferConfig) -> Self {
        Self {
            root: root.into(),
            chunk_size: config.chunk_size.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self, store: &str) -> PathBuf {
        self.root.join(store)
    }

    pub fn blob_path(&self, store: &str, partition: PartitionId) -> PathBuf {
        self.store_dir(store).join(format!("{}.snap", partition))
    }

    pub fn metadata_path(&self, store: &str, partition: PartitionId) -> PathBuf {
        self.store_dir(store).join(format!("{}.meta", partition))
    }
}

#[async_trait]
impl TransferClient for FsBlobStore {
    type Token = BlobId;

    async fn start(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::debug!(root = %self.root.display(), "Blob store ready");
        Ok(())
    }

    async fn fetch(
        &self,
        store: &str,
        partition: PartitionId,
    ) -> Result<Box<dyn SnapshotSource>> {
        if !fs::try_exists(self.store_dir(store)).await? {
            return Err(StoreError::StoreNotFound {
                store: store.to_string(),
            });
        }

        let raw = match fs::read(self.metadata_path(store, partition)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::partition_not_found(store, partition));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: SnapshotMetadata = bincode::deserialize(&raw)?;

        let file = match File::open(self.blob_path(store, partition)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::partition_not_found(store, partition));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(store, partition, bytes = metadata.byte_len, "Streaming blob");
        Ok(Box::new(FileSource {
            metadata,
            file,
            chunk_size: self.chunk_size,
        }))
    }

    async fn upload(
        &self,
        store: &str,
        partition: PartitionId,
        snapshot: Snapshot,
    ) -> Result<BlobId> {
        fs::create_dir_all(self.store_dir(store)).await?;

        let meta_path = self.metadata_path(store, partition);
        match fs::remove_file(&meta_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let blob_path = self.blob_path(store, partition);
        write_atomic(&blob_path, snapshot.data()).await?;

        let metadata = snapshot.metadata();
        let raw = bincode::serialize(&metadata)?;
        write_atomic(&meta_path, &raw).await?;

        tracing::info!(
            store,
            partition,
            entries = metadata.entry_count,
            bytes = metadata.byte_len,
            path = %blob_path.display(),
            "Uploaded snapshot"
        );
        Ok(BlobId {
            path: blob_path,
            checksum: metadata.checksum,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Write to `{path}.tmp`, fsync, then rename over `path`
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Chunked reader over a `.snap` file
struct FileSource {
    metadata: SnapshotMetadata,
    file: File,
    chunk_size: usize,
}

#[async_trait]
impl SnapshotSource for FileSource {
    fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; self.chunk_size];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }
}
