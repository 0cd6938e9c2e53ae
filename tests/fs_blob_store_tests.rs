//! Tests for the filesystem blob store
//!
//! These tests verify:
//! - Upload layout and tokens
//! - Streaming fetch in configured chunk sizes
//! - Not-found reporting for missing stores and partitions
//! - Upload then bootstrap through the manager

use std::fs;
use std::sync::Arc;

use partstore::transfer::{Snapshot, TransferClient};
use partstore::{
    BlobTransferManager, FsBlobStore, StoragePartitionConfig, StoreConfig, StoreError,
    StoreRegistry, TransferConfig,
};
use tempfile::TempDir;

const STORE: &str = "users_v1";

// =============================================================================
// Helper Functions
// =============================================================================

fn store(root: &TempDir, chunk_size: usize) -> FsBlobStore {
    let config = TransferConfig::builder().chunk_size(chunk_size).build();
    FsBlobStore::new(root.path().join("blobs"), &config)
}

fn snapshot() -> Snapshot {
    Snapshot::encode((0..20).map(|i| {
        (
            format!("key_{:02}", i).into_bytes(),
            format!("value_{}", i).into_bytes(),
        )
    }))
    .unwrap()
}

// =============================================================================
// Client Tests
// =============================================================================

#[tokio::test]
async fn test_upload_writes_blob_and_metadata() {
    let temp = TempDir::new().unwrap();
    let blobs = store(&temp, 64);
    blobs.start().await.unwrap();

    let token = blobs.upload(STORE, 3, snapshot()).await.unwrap();

    assert_eq!(token.path, blobs.blob_path(STORE, 3));
    assert_eq!(token.checksum, snapshot().metadata().checksum);
    assert_eq!(fs::read(&token.path).unwrap(), snapshot().data().to_vec());
    assert!(blobs.metadata_path(STORE, 3).exists());
    assert!(!blobs.store_dir(STORE).join("3.snap.tmp").exists());
}

#[tokio::test]
async fn test_fetch_streams_in_chunks() {
    let temp = TempDir::new().unwrap();
    let blobs = store(&temp, 16);
    blobs.start().await.unwrap();
    blobs.upload(STORE, 3, snapshot()).await.unwrap();

    let mut source = blobs.fetch(STORE, 3).await.unwrap();
    assert_eq!(source.metadata(), snapshot().metadata());

    let mut body = Vec::new();
    while let Some(chunk) = source.next_chunk().await.unwrap() {
        assert!(chunk.len() <= 16);
        body.extend_from_slice(&chunk);
    }
    assert_eq!(body, snapshot().data().to_vec());
}

#[tokio::test]
async fn test_fetch_missing_store() {
    let temp = TempDir::new().unwrap();
    let blobs = store(&temp, 64);
    blobs.start().await.unwrap();

    let err = blobs.fetch("orders_v1", 0).await.err().unwrap();
    assert!(matches!(err, StoreError::StoreNotFound { .. }));
}

#[tokio::test]
async fn test_fetch_missing_partition() {
    let temp = TempDir::new().unwrap();
    let blobs = store(&temp, 64);
    blobs.start().await.unwrap();
    blobs.upload(STORE, 3, snapshot()).await.unwrap();

    let err = blobs.fetch(STORE, 4).await.err().unwrap();
    assert!(matches!(err, StoreError::PartitionNotFound { partition: 4, .. }));
}

#[tokio::test]
async fn test_reupload_replaces_blob() {
    let temp = TempDir::new().unwrap();
    let blobs = store(&temp, 64);
    blobs.start().await.unwrap();
    blobs.upload(STORE, 3, snapshot()).await.unwrap();

    let smaller = Snapshot::encode([(b"only".as_slice(), b"one".as_slice())]).unwrap();
    let token = blobs.upload(STORE, 3, smaller.clone()).await.unwrap();

    assert_eq!(token.checksum, smaller.metadata().checksum);
    let source = blobs.fetch(STORE, 3).await.unwrap();
    assert_eq!(source.metadata(), smaller.metadata());
}

// =============================================================================
// Manager Round-Trip Tests
// =============================================================================

#[tokio::test]
async fn test_upload_then_bootstrap_on_another_node() {
    let temp = TempDir::new().unwrap();

    // Node A holds partition 3 and uploads it
    let node_a = Arc::new(StoreRegistry::new());
    let engine_a = node_a
        .open_store(StoreConfig::builder(STORE).build())
        .unwrap();
    engine_a
        .create_storage_partition(&StoragePartitionConfig::new(STORE, 3))
        .unwrap();
    for i in 0..100 {
        let key = format!("key_{:03}", i);
        engine_a.put(3, key.as_bytes(), b"payload").unwrap();
    }

    let manager_a = BlobTransferManager::new(store(&temp, 128), node_a, TransferConfig::default());
    manager_a.start().await.unwrap();
    let token = manager_a.put(STORE, 3).await.unwrap();
    assert!(token.path.exists());

    // Node B bootstraps it from the shared directory
    let node_b = Arc::new(StoreRegistry::new());
    let engine_b = node_b
        .open_store(StoreConfig::builder(STORE).build())
        .unwrap();
    let manager_b =
        BlobTransferManager::new(store(&temp, 128), Arc::clone(&node_b), TransferConfig::default());
    manager_b.start().await.unwrap();

    let snapshot = manager_b.get(STORE, 3).await.unwrap();

    assert_eq!(snapshot.metadata().checksum, token.checksum);
    assert_eq!(engine_b.partition(3).unwrap().len().unwrap(), 100);
    assert_eq!(engine_b.get(3, b"key_042").unwrap(), Some(b"payload".to_vec()));

    manager_a.close().await.unwrap();
    manager_b.close().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_from_empty_blob_dir_falls_back() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(StoreRegistry::new());
    let engine = registry
        .open_store(StoreConfig::builder(STORE).build())
        .unwrap();

    let manager =
        BlobTransferManager::new(store(&temp, 64), Arc::clone(&registry), TransferConfig::default());
    manager.start().await.unwrap();

    let err = manager.get(STORE, 5).await.unwrap_err();
    assert!(err.should_fall_back());
    assert!(!engine.contains_partition(5));
}
