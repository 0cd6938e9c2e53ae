//! Blob Transfer Manager
//!
//! Bootstraps partitions from snapshots held by peers or blob storage, and
//! uploads local partitions so that other nodes can bootstrap from them.
//!
//! ## Manager States
//! ```text
//! Created ──start()──┬──► Started ──close()──► Closed
//!                    └──► Failed  ──close()──► Closed
//! ```
//!
//! ## Get Flow
//! ```text
//! get(store, p)
//!   ├── store unknown           → StoreNotFound
//!   ├── p active locally        → PartitionAlreadyExists
//!   └── join or start session
//!         fetch ─► decode chunks into staging ─► verify ─► publish
//!         any failure: staging dropped, nothing visible
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::RwLock;

use crate::config::{TransferConfig, TransferOptions};
use crate::engine::{StorageEngine, StoreRegistry};
use crate::error::{Result, StoreError};
use crate::partition::{PartitionId, StoragePartitionConfig};

use super::client::TransferClient;
use super::session::{self, SessionKey, SessionState, SessionTable, TransferDirection};
use super::snapshot::{Snapshot, SnapshotDecoder};

/// Upper bound on the buffer reserved up front for an incoming body
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Lifecycle state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Created,
    Started,
    Failed,
    Closed,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::Created => f.write_str("CREATED"),
            ManagerState::Started => f.write_str("STARTED"),
            ManagerState::Failed => f.write_str("FAILED"),
            ManagerState::Closed => f.write_str("CLOSED"),
        }
    }
}

/// Coordinates snapshot transfers for every store in a registry
pub struct BlobTransferManager<C: TransferClient> {
    client: Arc<C>,
    registry: Arc<StoreRegistry>,
    config: TransferConfig,
    state: RwLock<ManagerState>,
    gets: Arc<SessionTable<Snapshot>>,
    puts: Arc<SessionTable<C::Token>>,
}

impl<C: TransferClient> BlobTransferManager<C> {
    pub fn new(client: C, registry: Arc<StoreRegistry>, config: TransferConfig) -> Self {
        Self {
            client: Arc::new(client),
            registry,
            config,
            state: RwLock::new(ManagerState::Created),
            gets: SessionTable::new(),
            puts: SessionTable::new(),
        }
    }

    /// Start the transfer client
    ///
    /// A failed start leaves the manager in `Failed`; it cannot be retried.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.state.read();
            if *state != ManagerState::Created {
                return Err(StoreError::InvalidState(format!(
                    "transfer manager cannot start from state {}",
                    *state
                )));
            }
        }

        match self.client.start().await {
            Ok(()) => {
                self.transition(ManagerState::Created, ManagerState::Started);
                tracing::info!("Blob transfer manager started");
                Ok(())
            }
            Err(e) => {
                self.transition(ManagerState::Created, ManagerState::Failed);
                tracing::error!(error = %e, "Blob transfer manager failed to start");
                Err(e)
            }
        }
    }

    // =========================================================================
    // Get
    // =========================================================================

    /// Bootstrap a partition from a remote snapshot
    pub async fn get(&self, store: &str, partition: PartitionId) -> Result<Snapshot> {
        self.get_with(store, partition, TransferOptions::default()).await
    }

    /// `get` with per-call options
    ///
    /// Joining an in-flight session inherits its deadline.
    pub async fn get_with(
        &self,
        store: &str,
        partition: PartitionId,
        options: TransferOptions,
    ) -> Result<Snapshot> {
        self.ensure_started()?;
        let engine = self.registry.get(store)?;
        if engine.contains_partition(partition) {
            return Err(StoreError::PartitionAlreadyExists {
                store: store.to_string(),
                partition,
            });
        }

        let key = SessionKey::new(store, partition, TransferDirection::Get);
        let timeout = options.timeout.unwrap_or(self.config.get_timeout);
        let client = Arc::clone(&self.client);

        let (receiver, joined) = self.gets.join_or_start(key.clone(), move || {
            run_session(
                key,
                timeout,
                fetch_into_engine(client, engine, partition),
            )
        });
        if joined {
            tracing::debug!(store, partition, "Joined in-flight get session");
        }

        settle(store, partition, session::wait(receiver).await)
    }

    // =========================================================================
    // Put
    // =========================================================================

    /// Upload a local active partition
    pub async fn put(&self, store: &str, partition: PartitionId) -> Result<C::Token> {
        self.put_with(store, partition, TransferOptions::default()).await
    }

    /// `put` with per-call options
    pub async fn put_with(
        &self,
        store: &str,
        partition: PartitionId,
        options: TransferOptions,
    ) -> Result<C::Token> {
        self.ensure_started()?;
        let engine = self.registry.get(store)?;
        let local = engine.partition(partition)?;

        let key = SessionKey::new(store, partition, TransferDirection::Put);
        let timeout = options.timeout.unwrap_or(self.config.put_timeout);
        let client = Arc::clone(&self.client);
        let store_name = store.to_string();

        let (receiver, joined) = self.puts.join_or_start(key.clone(), move || {
            run_session(key, timeout, async move {
                let snapshot = Snapshot::capture(&local)?;
                client
                    .upload(&store_name, partition, snapshot)
                    .await
                    .map_err(|e| as_transfer_error(&store_name, partition, e))
            })
        });
        if joined {
            tracing::debug!(store, partition, "Joined in-flight put session");
        }

        settle(store, partition, session::wait(receiver).await)
    }

    // =========================================================================
    // Cancel / Close
    // =========================================================================

    /// Abort the in-flight session; false if there is none
    ///
    /// Waiters observe `Cancelled`. A cancelled get never publishes.
    pub fn cancel(&self, store: &str, partition: PartitionId, direction: TransferDirection) -> bool {
        let key = SessionKey::new(store, partition, direction);
        let cancelled = match direction {
            TransferDirection::Get => self.gets.cancel(&key),
            TransferDirection::Put => self.puts.cancel(&key),
        };
        if cancelled {
            tracing::info!(session = %key, "Cancelled transfer session");
        }
        cancelled
    }

    /// Cancel every session, wait for them to wind down, then close the client
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state == ManagerState::Closed {
                return Ok(());
            }
            *state = ManagerState::Closed;
        }

        let mut aborted = self.gets.cancel_all();
        aborted.extend(self.puts.cancel_all());
        let cancelled = aborted.len();

        for task in aborted {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Transfer session task failed during shutdown");
                }
            }
        }
        self.client.close().await?;

        tracing::info!(cancelled, "Blob transfer manager closed");
        Ok(())
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    /// Number of sessions currently in flight
    pub fn in_flight_sessions(&self) -> usize {
        self.gets.len() + self.puts.len()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_started(&self) -> Result<()> {
        match *self.state.read() {
            ManagerState::Started => Ok(()),
            other => Err(StoreError::InvalidState(format!(
                "transfer manager is {}",
                other
            ))),
        }
    }

    fn transition(&self, from: ManagerState, to: ManagerState) {
        let mut state = self.state.write();
        if *state == from {
            *state = to;
        }
    }
}

// =============================================================================
// Session Bodies
// =============================================================================

/// Apply the deadline and log the outcome of one session
async fn run_session<T, F>(key: SessionKey, timeout: Duration, work: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tracing::info!(session = %key, timeout_ms = timeout.as_millis() as u64, "Transfer session started");

    let outcome = match tokio::time::timeout(timeout, work).await {
        Ok(outcome) => outcome,
        Err(_) => Err(StoreError::transfer(
            &key.store,
            key.partition,
            format!("timed out after {:?}", timeout),
        )),
    };

    match &outcome {
        Ok(_) => tracing::info!(session = %key, "Transfer session succeeded"),
        Err(e) => tracing::warn!(session = %key, error = %e, "Transfer session failed"),
    }
    outcome
}

/// Stream a snapshot into a staging partition and publish it
async fn fetch_into_engine<C: TransferClient>(
    client: Arc<C>,
    engine: Arc<StorageEngine>,
    partition: PartitionId,
) -> Result<Snapshot> {
    let store = engine.store_name().to_string();

    let mut source = client
        .fetch(&store, partition)
        .await
        .map_err(|e| as_transfer_error(&store, partition, e))?;
    let metadata = source.metadata();

    let staging =
        engine.create_staging_partition(&StoragePartitionConfig::new(store.clone(), partition))?;
    let mut decoder = SnapshotDecoder::new(metadata);
    let mut body = BytesMut::with_capacity(metadata.byte_len.min(MAX_PREALLOCATION) as usize);

    while let Some(chunk) = source
        .next_chunk()
        .await
        .map_err(|e| as_transfer_error(&store, partition, e))?
    {
        decoder
            .feed(&chunk, |key, value| staging.put(key, value))
            .map_err(|e| as_transfer_error(&store, partition, e))?;
        body.extend_from_slice(&chunk);
    }
    decoder
        .finish()
        .map_err(|e| StoreError::transfer(&store, partition, e.to_string()))?;

    tracing::debug!(
        store = %store,
        partition,
        entries = metadata.entry_count,
        bytes = metadata.byte_len,
        "Snapshot verified"
    );

    engine.publish_staging(staging)?;
    Ok(Snapshot::from_parts(metadata, body.freeze()))
}

/// Keep errors the caller can act on; everything else becomes a transfer failure
fn as_transfer_error(store: &str, partition: PartitionId, err: StoreError) -> StoreError {
    match err {
        StoreError::StoreNotFound { .. }
        | StoreError::PartitionNotFound { .. }
        | StoreError::TransferFailure { .. }
        | StoreError::Cancelled { .. }
        | StoreError::PersistenceFailure { .. }
        | StoreError::EngineClosed { .. } => err,
        other => StoreError::transfer(store, partition, other.to_string()),
    }
}

fn settle<T>(store: &str, partition: PartitionId, state: SessionState<T>) -> Result<T> {
    match state {
        SessionState::Succeeded(value) => Ok(value),
        SessionState::Failed(err) => Err(err),
        SessionState::Cancelled => Err(StoreError::Cancelled {
            store: store.to_string(),
            partition,
        }),
        SessionState::Pending => Err(StoreError::InvalidState(
            "transfer session ended without an outcome".to_string(),
        )),
    }
}
