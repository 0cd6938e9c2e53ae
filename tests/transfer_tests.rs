//! Tests for the Blob Transfer Manager
//!
//! These tests verify:
//! - Bootstrapping a partition from a snapshot
//! - Fallback-class failures leave nothing visible
//! - Integrity checks on the received stream
//! - Session coalescing for get and put
//! - Timeouts, cancellation and manager lifecycle

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use partstore::transfer::{
    BytesSource, ManagerState, Snapshot, SnapshotMetadata, SnapshotSource, TransferClient,
    TransferDirection,
};
use partstore::{
    BlobTransferManager, PartitionId, PersistenceType, StorageEngine, StoragePartitionConfig,
    StoreConfig, StoreError, StoreRegistry, TransferConfig, TransferOptions,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;

const STORE: &str = "users-v1";

// =============================================================================
// Mock Client
// =============================================================================

#[derive(Default)]
struct MockClient {
    blobs: Mutex<HashMap<(String, PartitionId), (SnapshotMetadata, Bytes)>>,
    fetches: AtomicUsize,
    uploads: AtomicUsize,
    /// When set, fetch and upload wait for a permit
    gate: Option<Arc<Semaphore>>,
    /// When set, sources stop after their first chunk until a permit arrives
    stall: Option<Arc<Semaphore>>,
    /// Raised once a stalling source has handed out its first chunk
    stalled: Arc<AtomicBool>,
    fail_start: bool,
    closed: AtomicBool,
}

impl MockClient {
    fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let client = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (client, gate)
    }

    fn stalling() -> (Self, Arc<Semaphore>) {
        let stall = Arc::new(Semaphore::new(0));
        let client = Self {
            stall: Some(Arc::clone(&stall)),
            ..Self::default()
        };
        (client, stall)
    }

    fn serve(&self, partition: PartitionId, metadata: SnapshotMetadata, data: Bytes) {
        self.blobs
            .lock()
            .unwrap()
            .insert((STORE.to_string(), partition), (metadata, data));
    }

    fn serve_snapshot(&self, partition: PartitionId, snapshot: &Snapshot) {
        self.serve(partition, snapshot.metadata(), snapshot.data().clone());
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
    }
}

#[async_trait]
impl TransferClient for MockClient {
    type Token = u32;

    async fn start(&self) -> partstore::Result<()> {
        if self.fail_start {
            return Err(StoreError::TransferFailure {
                store: String::new(),
                partition: 0,
                reason: "peer discovery unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn fetch(
        &self,
        store: &str,
        partition: PartitionId,
    ) -> partstore::Result<Box<dyn SnapshotSource>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;

        let blob = self
            .blobs
            .lock()
            .unwrap()
            .get(&(store.to_string(), partition))
            .cloned();
        match blob {
            Some((metadata, data)) => match &self.stall {
                Some(stall) => Ok(Box::new(StallingSource {
                    inner: BytesSource::from_parts(metadata, data, FIRST_ENTRY_LEN),
                    stall: Arc::clone(stall),
                    stalled: Arc::clone(&self.stalled),
                    served: 0,
                })),
                None => Ok(Box::new(BytesSource::from_parts(metadata, data, 7))),
            },
            None => Err(StoreError::PartitionNotFound {
                store: store.to_string(),
                partition,
            }),
        }
    }

    async fn upload(
        &self,
        store: &str,
        partition: PartitionId,
        snapshot: Snapshot,
    ) -> partstore::Result<u32> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;

        let checksum = snapshot.metadata().checksum;
        self.blobs.lock().unwrap().insert(
            (store.to_string(), partition),
            (snapshot.metadata(), snapshot.data().clone()),
        );
        Ok(checksum)
    }

    async fn close(&self) -> partstore::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Header plus the `alice` entry of `sample_snapshot`
const FIRST_ENTRY_LEN: usize = 6 + 8 + 5 + 1;

/// Serves one chunk, then waits for a permit before each further chunk
struct StallingSource {
    inner: BytesSource,
    stall: Arc<Semaphore>,
    stalled: Arc<AtomicBool>,
    served: usize,
}

#[async_trait]
impl SnapshotSource for StallingSource {
    fn metadata(&self) -> SnapshotMetadata {
        self.inner.metadata()
    }

    async fn next_chunk(&mut self) -> partstore::Result<Option<Bytes>> {
        if self.served > 0 {
            // The previous chunk has been decoded into staging by now
            self.stalled.store(true, Ordering::SeqCst);
            self.stall.acquire().await.unwrap().forget();
        }
        self.served += 1;
        self.inner.next_chunk().await
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn registry() -> Arc<StoreRegistry> {
    let registry = Arc::new(StoreRegistry::new());
    registry
        .open_store(StoreConfig::builder(STORE).build())
        .unwrap();
    registry
}

fn sample_snapshot() -> Snapshot {
    Snapshot::encode([
        (b"alice".as_slice(), b"1".as_slice()),
        (b"bob".as_slice(), b"2".as_slice()),
        (b"carol".as_slice(), b"3".as_slice()),
    ])
    .unwrap()
}

async fn started(client: MockClient, registry: Arc<StoreRegistry>) -> BlobTransferManager<MockClient> {
    let manager = BlobTransferManager::new(client, registry, TransferConfig::default());
    manager.start().await.unwrap();
    manager
}

fn engine(registry: &StoreRegistry) -> Arc<StorageEngine> {
    registry.get(STORE).unwrap()
}

fn durable_registry(dir: &std::path::Path) -> (Arc<StoreRegistry>, StoreConfig) {
    let config = StoreConfig::builder(STORE)
        .persistence_type(PersistenceType::Durable)
        .data_dir(dir)
        .build();
    let registry = Arc::new(StoreRegistry::new());
    registry.open_store(config.clone()).unwrap();
    (registry, config)
}

fn staging_leftovers(config: &StoreConfig) -> usize {
    std::fs::read_dir(config.store_dir().join(".staging"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

async fn wait_until_stalled(client: &MockClient) {
    while !client.stalled.load(Ordering::SeqCst) {
        tokio::task::yield_now().await;
    }
}

async fn wait_for_sessions<C: TransferClient>(manager: &BlobTransferManager<C>, count: usize) {
    while manager.in_flight_sessions() != count {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Get Tests
// =============================================================================

#[tokio::test]
async fn test_get_bootstraps_partition() {
    let registry = registry();
    let client = MockClient::default();
    client.serve_snapshot(5, &sample_snapshot());
    let manager = started(client, Arc::clone(&registry)).await;

    let snapshot = manager.get(STORE, 5).await.unwrap();

    assert_eq!(snapshot, sample_snapshot());
    let engine = engine(&registry);
    assert_eq!(engine.get(5, b"alice").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.partition(5).unwrap().len().unwrap(), 3);
    assert_eq!(manager.client().fetches(), 1);
    assert_eq!(manager.in_flight_sessions(), 0);
}

#[tokio::test]
async fn test_get_without_peer_falls_back() {
    let registry = registry();
    let manager = started(MockClient::default(), Arc::clone(&registry)).await;

    let err = manager.get(STORE, 5).await.unwrap_err();

    assert!(matches!(err, StoreError::PartitionNotFound { partition: 5, .. }));
    assert!(err.should_fall_back());
    assert!(!engine(&registry).contains_partition(5));
}

#[tokio::test]
async fn test_get_unknown_store() {
    let manager = started(MockClient::default(), registry()).await;

    let err = manager.get("orders-v1", 0).await.unwrap_err();
    assert!(matches!(err, StoreError::StoreNotFound { .. }));
    assert_eq!(manager.client().fetches(), 0);
}

#[tokio::test]
async fn test_get_for_active_partition_rejected() {
    let registry = registry();
    engine(&registry)
        .create_storage_partition(&StoragePartitionConfig::new(STORE, 5))
        .unwrap();
    let client = MockClient::default();
    client.serve_snapshot(5, &sample_snapshot());
    let manager = started(client, registry).await;

    let err = manager.get(STORE, 5).await.unwrap_err();
    assert!(matches!(err, StoreError::PartitionAlreadyExists { .. }));
    assert_eq!(manager.client().fetches(), 0);
}

// =============================================================================
// Integrity Tests
// =============================================================================

#[tokio::test]
async fn test_checksum_mismatch_leaves_nothing_visible_then_retry_succeeds() {
    let registry = registry();
    let good = sample_snapshot();
    let mut tampered = good.data().to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xFF;

    let client = MockClient::default();
    client.serve(5, good.metadata(), Bytes::from(tampered));
    let manager = started(client, Arc::clone(&registry)).await;

    let err = manager.get(STORE, 5).await.unwrap_err();
    assert!(matches!(err, StoreError::TransferFailure { partition: 5, .. }));
    assert!(err.should_fall_back());
    assert!(!engine(&registry).contains_partition(5));

    // A later retry against a healthy source succeeds
    manager.client().serve_snapshot(5, &good);
    manager.get(STORE, 5).await.unwrap();
    assert_eq!(engine(&registry).get(5, b"carol").unwrap(), Some(b"3".to_vec()));
    assert_eq!(manager.client().fetches(), 2);
}

#[tokio::test]
async fn test_truncated_stream_rejected() {
    let registry = registry();
    let good = sample_snapshot();
    let short = good.data().slice(..good.data().len() - 4);

    let client = MockClient::default();
    client.serve(5, good.metadata(), short);
    let manager = started(client, Arc::clone(&registry)).await;

    let err = manager.get(STORE, 5).await.unwrap_err();
    assert!(matches!(err, StoreError::TransferFailure { .. }));
    assert!(!engine(&registry).contains_partition(5));
}

#[tokio::test]
async fn test_entry_count_mismatch_rejected() {
    let registry = registry();
    let good = sample_snapshot();
    let mut metadata = good.metadata();
    metadata.entry_count = 2;

    let client = MockClient::default();
    client.serve(5, metadata, good.data().clone());
    let manager = started(client, Arc::clone(&registry)).await;

    assert!(manager.get(STORE, 5).await.is_err());
    assert!(!engine(&registry).contains_partition(5));
}

// =============================================================================
// Coalescing Tests
// =============================================================================

#[tokio::test]
async fn test_concurrent_gets_share_one_fetch() {
    let registry = registry();
    let (client, gate) = MockClient::gated();
    client.serve_snapshot(5, &sample_snapshot());
    let manager = started(client, Arc::clone(&registry)).await;

    let (first, second, _) = tokio::join!(manager.get(STORE, 5), manager.get(STORE, 5), async {
        wait_for_sessions(&manager, 1).await;
        tokio::task::yield_now().await;
        gate.add_permits(1);
    });

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(manager.client().fetches(), 1);
    assert_eq!(engine(&registry).partition(5).unwrap().len().unwrap(), 3);
}

#[tokio::test]
async fn test_concurrent_gets_share_failure() {
    let registry = registry();
    let (client, gate) = MockClient::gated();
    let manager = started(client, Arc::clone(&registry)).await;

    let (first, second, _) = tokio::join!(manager.get(STORE, 9), manager.get(STORE, 9), async {
        wait_for_sessions(&manager, 1).await;
        tokio::task::yield_now().await;
        gate.add_permits(1);
    });

    assert!(first.unwrap_err().is_not_found());
    assert!(second.unwrap_err().is_not_found());
    assert_eq!(manager.client().fetches(), 1);
}

#[tokio::test]
async fn test_concurrent_puts_share_one_upload() {
    let registry = registry();
    let engine = engine(&registry);
    engine
        .create_storage_partition(&StoragePartitionConfig::new(STORE, 2))
        .unwrap();
    engine.put(2, b"k", b"v").unwrap();

    let (client, gate) = MockClient::gated();
    let manager = started(client, Arc::clone(&registry)).await;

    let (first, second, _) = tokio::join!(manager.put(STORE, 2), manager.put(STORE, 2), async {
        wait_for_sessions(&manager, 1).await;
        tokio::task::yield_now().await;
        gate.add_permits(1);
    });

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(manager.client().uploads(), 1);
}

// =============================================================================
// Put Tests
// =============================================================================

#[tokio::test]
async fn test_put_then_get_restores_dropped_partition() {
    let registry = registry();
    let engine = engine(&registry);
    engine
        .create_storage_partition(&StoragePartitionConfig::new(STORE, 1))
        .unwrap();
    engine.put(1, b"alice", b"1").unwrap();
    engine.put(1, b"bob", b"2").unwrap();

    let manager = started(MockClient::default(), Arc::clone(&registry)).await;
    manager.put(STORE, 1).await.unwrap();

    engine.drop_storage_partition(1).unwrap();
    let snapshot = manager.get(STORE, 1).await.unwrap();

    assert_eq!(snapshot.entry_count(), 2);
    assert_eq!(engine.get(1, b"bob").unwrap(), Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_put_missing_partition() {
    let manager = started(MockClient::default(), registry()).await;

    let err = manager.put(STORE, 4).await.unwrap_err();
    assert!(matches!(err, StoreError::PartitionNotFound { partition: 4, .. }));
    assert_eq!(manager.client().uploads(), 0);
}

// =============================================================================
// Timeout / Cancellation Tests
// =============================================================================

#[tokio::test]
async fn test_get_timeout_fails_session() {
    let registry = registry();
    let (client, _gate) = MockClient::gated();
    client.serve_snapshot(5, &sample_snapshot());
    let manager = started(client, Arc::clone(&registry)).await;

    let err = manager
        .get_with(STORE, 5, TransferOptions::with_timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::TransferFailure { .. }));
    assert!(err.to_string().contains("timed out"));
    assert!(!engine(&registry).contains_partition(5));
    assert_eq!(manager.in_flight_sessions(), 0);
}

#[tokio::test]
async fn test_cancel_in_flight_get() {
    let registry = registry();
    let (client, _gate) = MockClient::gated();
    client.serve_snapshot(5, &sample_snapshot());
    let manager = Arc::new(started(client, Arc::clone(&registry)).await);

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get(STORE, 5).await })
    };
    wait_for_sessions(&manager, 1).await;

    assert!(manager.cancel(STORE, 5, TransferDirection::Get));
    let err = waiter.await.unwrap().unwrap_err();

    assert!(matches!(err, StoreError::Cancelled { partition: 5, .. }));
    assert!(err.should_fall_back());
    assert!(!engine(&registry).contains_partition(5));
    assert!(!manager.cancel(STORE, 5, TransferDirection::Get));
}

#[tokio::test]
async fn test_abandoned_caller_does_not_stop_session() {
    let registry = registry();
    let (client, gate) = MockClient::gated();
    client.serve_snapshot(5, &sample_snapshot());
    let manager = started(client, Arc::clone(&registry)).await;

    // Poll once so the session starts, then abandon the future
    let abandoned = tokio::time::timeout(Duration::from_millis(10), manager.get(STORE, 5)).await;
    assert!(abandoned.is_err());
    assert_eq!(manager.in_flight_sessions(), 1);

    gate.add_permits(1);
    wait_for_sessions(&manager, 0).await;
    assert!(engine(&registry).contains_partition(5));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_operations_require_start() {
    let manager =
        BlobTransferManager::new(MockClient::default(), registry(), TransferConfig::default());

    assert_eq!(manager.state(), ManagerState::Created);
    assert!(matches!(
        manager.get(STORE, 0).await,
        Err(StoreError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_start_failure_is_terminal() {
    let client = MockClient {
        fail_start: true,
        ..MockClient::default()
    };
    let manager = BlobTransferManager::new(client, registry(), TransferConfig::default());

    assert!(manager.start().await.is_err());
    assert_eq!(manager.state(), ManagerState::Failed);
    assert!(matches!(
        manager.start().await,
        Err(StoreError::InvalidState(_))
    ));
    assert!(matches!(
        manager.get(STORE, 0).await,
        Err(StoreError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_close_cancels_sessions_and_rejects_later_calls() {
    let registry = registry();
    let (client, _gate) = MockClient::gated();
    client.serve_snapshot(5, &sample_snapshot());
    let manager = Arc::new(started(client, Arc::clone(&registry)).await);

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get(STORE, 5).await })
    };
    wait_for_sessions(&manager, 1).await;

    manager.close().await.unwrap();

    assert!(matches!(
        waiter.await.unwrap(),
        Err(StoreError::Cancelled { .. })
    ));
    assert_eq!(manager.state(), ManagerState::Closed);
    assert!(manager.client().closed.load(Ordering::SeqCst));
    assert!(matches!(
        manager.get(STORE, 5).await,
        Err(StoreError::InvalidState(_))
    ));
    assert!(!engine(&registry).contains_partition(5));

    // Closing twice is harmless
    manager.close().await.unwrap();
}

// =============================================================================
// Durable Bootstrap Tests
// =============================================================================

#[tokio::test]
async fn test_bootstrap_into_durable_store_survives_restart() {
    let temp = TempDir::new().unwrap();
    let config = StoreConfig::builder(STORE)
        .persistence_type(PersistenceType::Durable)
        .data_dir(temp.path())
        .build();

    {
        let registry = Arc::new(StoreRegistry::new());
        registry.open_store(config.clone()).unwrap();
        let client = MockClient::default();
        client.serve_snapshot(5, &sample_snapshot());
        let manager = started(client, Arc::clone(&registry)).await;

        manager.get(STORE, 5).await.unwrap();
        manager.close().await.unwrap();
        registry.close_all().unwrap();
    }

    let engine = StorageEngine::open(config).unwrap();
    assert_eq!(
        engine.persisted_partition_ids().unwrap().into_iter().collect::<Vec<_>>(),
        vec![5]
    );
    assert_eq!(engine.get(5, b"bob").unwrap(), Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_failed_bootstrap_into_durable_store_leaves_no_files() {
    let temp = TempDir::new().unwrap();
    let config = StoreConfig::builder(STORE)
        .persistence_type(PersistenceType::Durable)
        .data_dir(temp.path())
        .build();
    let registry = Arc::new(StoreRegistry::new());
    registry.open_store(config.clone()).unwrap();

    let good = sample_snapshot();
    let mut tampered = good.data().to_vec();
    tampered[10] ^= 0x01;
    let client = MockClient::default();
    client.serve(5, good.metadata(), Bytes::from(tampered));
    let manager = started(client, Arc::clone(&registry)).await;

    assert!(manager.get(STORE, 5).await.is_err());

    let staging_root = config.store_dir().join(".staging");
    let leftovers = std::fs::read_dir(&staging_root)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
    assert!(engine(&registry).persisted_partition_ids().unwrap().is_empty());
}

// =============================================================================
// Partially Staged Transfer Tests
// =============================================================================

#[tokio::test]
async fn test_cancel_after_partial_stream_discards_staging() {
    let temp = TempDir::new().unwrap();
    let (registry, config) = durable_registry(temp.path());
    let (client, _stall) = MockClient::stalling();
    client.serve_snapshot(5, &sample_snapshot());
    let manager = Arc::new(started(client, Arc::clone(&registry)).await);

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get(STORE, 5).await })
    };
    wait_until_stalled(manager.client()).await;
    assert_eq!(staging_leftovers(&config), 1);

    assert!(manager.cancel(STORE, 5, TransferDirection::Get));
    let err = waiter.await.unwrap().unwrap_err();

    assert!(matches!(err, StoreError::Cancelled { partition: 5, .. }));
    let engine = engine(&registry);
    assert!(!engine.contains_partition(5));
    assert_eq!(staging_leftovers(&config), 0);
    assert!(engine.persisted_partition_ids().unwrap().is_empty());
}

#[tokio::test]
async fn test_timeout_after_partial_stream_discards_staging() {
    let temp = TempDir::new().unwrap();
    let (registry, config) = durable_registry(temp.path());
    let (client, _stall) = MockClient::stalling();
    client.serve_snapshot(5, &sample_snapshot());
    let manager = started(client, Arc::clone(&registry)).await;

    let err = manager
        .get_with(STORE, 5, TransferOptions::with_timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();

    assert!(manager.client().stalled.load(Ordering::SeqCst));
    assert!(matches!(err, StoreError::TransferFailure { .. }));
    let engine = engine(&registry);
    assert!(!engine.contains_partition(5));
    assert_eq!(staging_leftovers(&config), 0);
    assert!(engine.persisted_partition_ids().unwrap().is_empty());
}

#[tokio::test]
async fn test_close_waits_for_partial_transfer_to_be_discarded() {
    let temp = TempDir::new().unwrap();
    let (registry, config) = durable_registry(temp.path());
    let (client, _stall) = MockClient::stalling();
    client.serve_snapshot(5, &sample_snapshot());
    let manager = Arc::new(started(client, Arc::clone(&registry)).await);

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get(STORE, 5).await })
    };
    wait_until_stalled(manager.client()).await;
    assert_eq!(staging_leftovers(&config), 1);

    manager.close().await.unwrap();

    // Staging is gone by the time close returns
    assert_eq!(staging_leftovers(&config), 0);
    assert_eq!(manager.in_flight_sessions(), 0);
    assert!(matches!(
        waiter.await.unwrap(),
        Err(StoreError::Cancelled { .. })
    ));
    assert!(engine(&registry).persisted_partition_ids().unwrap().is_empty());
}
