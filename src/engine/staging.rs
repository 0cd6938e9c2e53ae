//! Staging partitions
//!
//! A staging partition receives an in-progress transfer. It is invisible to
//! readers until [`StorageEngine::publish_staging`](super::StorageEngine::publish_staging)
//! swaps it in. Dropping it unpublished discards everything it received.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::partition::{PartitionId, StoragePartition, StoragePartitionConfig};

use super::backend::StorageBackend;

/// Not-yet-visible partition owned by one transfer session
pub struct StagingPartition {
    config: StoragePartitionConfig,
    session: u64,
    backend: Arc<dyn StorageBackend>,
    /// Taken on publish; whatever is left on drop gets discarded
    inner: Option<Box<dyn StoragePartition>>,
}

impl StagingPartition {
    pub(crate) fn new(
        config: StoragePartitionConfig,
        session: u64,
        backend: Arc<dyn StorageBackend>,
        inner: Box<dyn StoragePartition>,
    ) -> Self {
        Self {
            config,
            session,
            backend,
            inner: Some(inner),
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.config.partition_id()
    }

    pub fn store_name(&self) -> &str {
        self.config.store_name()
    }

    pub fn config(&self) -> &StoragePartitionConfig {
        &self.config
    }

    /// Session number that distinguishes concurrent stagings of one id
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.live()?.put(key, value)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.live()?.get(key)
    }

    /// Entries received so far
    pub fn len(&self) -> usize {
        self.inner.as_ref().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn take_inner(&mut self) -> Result<Box<dyn StoragePartition>> {
        self.inner.take().ok_or_else(|| {
            StoreError::InvalidState(format!(
                "staging partition {}/{} already consumed",
                self.store_name(),
                self.partition_id()
            ))
        })
    }

    fn live(&self) -> Result<&dyn StoragePartition> {
        self.inner.as_deref().ok_or_else(|| {
            StoreError::InvalidState(format!(
                "staging partition {}/{} already consumed",
                self.store_name(),
                self.partition_id()
            ))
        })
    }
}

impl Drop for StagingPartition {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        let received = inner.len();
        match self
            .backend
            .discard_staging_partition(self.partition_id(), self.session, inner)
        {
            Ok(()) => tracing::debug!(
                store = %self.config.store_name(),
                partition = self.partition_id(),
                session = self.session,
                received,
                "Discarded staging partition"
            ),
            Err(e) => tracing::warn!(
                store = %self.config.store_name(),
                partition = self.partition_id(),
                session = self.session,
                error = %e,
                "Failed to discard staging partition"
            ),
        }
    }
}

impl fmt::Debug for StagingPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingPartition")
            .field("store", &self.store_name())
            .field("partition", &self.partition_id())
            .field("session", &self.session)
            .field("entries", &self.len())
            .finish()
    }
}
