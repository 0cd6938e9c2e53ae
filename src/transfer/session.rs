//! Transfer sessions
//!
//! At most one session runs per `(store, partition, direction)`. A caller
//! that finds one in flight subscribes to its outcome instead of starting a
//! second transfer.
//!
//! ## Session States
//! ```text
//! Pending ──┬──► Succeeded
//!           ├──► Failed      (error, timeout, integrity mismatch)
//!           └──► Cancelled   (aborted)
//! ```
//!
//! Each session is a spawned task owning a `watch` sender. The task removes
//! its own slot from the table before publishing the outcome, so a caller
//! arriving afterwards starts a fresh session. Aborting the task drops the
//! sender, which waiters observe as `Cancelled`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::partition::PartitionId;

/// Which way a session moves data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    /// Fetch a partition into the local engine
    Get,
    /// Upload a local partition
    Put,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Get => f.write_str("GET"),
            TransferDirection::Put => f.write_str("PUT"),
        }
    }
}

/// Coalescing key for sessions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub store: String,
    pub partition: PartitionId,
    pub direction: TransferDirection,
}

impl SessionKey {
    pub fn new(store: impl Into<String>, partition: PartitionId, direction: TransferDirection) -> Self {
        Self {
            store: store.into(),
            partition,
            direction,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.direction, self.store, self.partition)
    }
}

/// Observable state of one session
#[derive(Debug, Clone)]
pub enum SessionState<T> {
    Pending,
    Succeeded(T),
    Failed(StoreError),
    Cancelled,
}

impl<T> SessionState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, SessionState::Pending)
    }
}

/// Subscription to a session's outcome
pub type SessionWatch<T> = watch::Receiver<SessionState<T>>;

struct Slot<T> {
    id: u64,
    receiver: SessionWatch<T>,
    task: JoinHandle<()>,
}

// =============================================================================
// Session Table
// =============================================================================

/// Table of in-flight sessions
pub struct SessionTable<T> {
    slots: Mutex<HashMap<SessionKey, Slot<T>>>,
    next_id: AtomicU64,
}

impl<T> SessionTable<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Subscribe to the session for `key`, spawning `start()` if none runs
    ///
    /// Returns the subscription and whether an existing session was joined.
    /// Must be called from within a tokio runtime.
    pub fn join_or_start<F, Fut>(self: &Arc<Self>, key: SessionKey, start: F) -> (SessionWatch<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&key) {
            return (slot.receiver.clone(), true);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = watch::channel(SessionState::Pending);
        let work = start();
        let table = Arc::clone(self);
        let task_key = key.clone();

        // The slot lock is held until the slot is inserted, so the task
        // cannot try to remove it first.
        let task = tokio::spawn(async move {
            let state = match work.await {
                Ok(value) => SessionState::Succeeded(value),
                Err(err) => SessionState::Failed(err),
            };
            table.remove(&task_key, id);
            let _ = sender.send(state);
        });

        slots.insert(
            key,
            Slot {
                id,
                receiver: receiver.clone(),
                task,
            },
        );
        (receiver, false)
    }

    /// Abort the session for `key`; false if none is in flight
    pub fn cancel(&self, key: &SessionKey) -> bool {
        let slot = self.slots.lock().remove(key);
        match slot {
            Some(slot) => {
                slot.task.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every session and hand back the aborted tasks
    ///
    /// Awaiting the handles waits until each task has been torn down.
    pub fn cancel_all(&self) -> Vec<JoinHandle<()>> {
        let slots: Vec<_> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        slots
            .into_iter()
            .map(|slot| {
                slot.task.abort();
                slot.task
            })
            .collect()
    }

    /// Number of sessions in flight
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, key: &SessionKey, id: u64) {
        let mut slots = self.slots.lock();
        if slots.get(key).map(|slot| slot.id) == Some(id) {
            slots.remove(key);
        }
    }
}

/// Wait for a session to leave `Pending`
///
/// A sender dropped without a final state means the task was aborted.
pub async fn wait<T: Clone>(mut receiver: SessionWatch<T>) -> SessionState<T> {
    loop {
        {
            let state = receiver.borrow();
            if !state.is_pending() {
                return (*state).clone();
            }
        }
        if receiver.changed().await.is_err() {
            let state = receiver.borrow();
            return if state.is_pending() {
                SessionState::Cancelled
            } else {
                (*state).clone()
            };
        }
    }
}
