//! Store registry
//!
//! Node-level map of open stores. The transfer manager resolves store names
//! through it, and operational tooling reads its status.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::partition::{PartitionId, PartitionState};
use crate::persistence::PersistenceType;

use super::{EngineState, StorageEngine};

/// Status of one store for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    pub store_name: String,
    pub persistence_type: PersistenceType,
    pub state: EngineState,
    pub partitions: BTreeMap<PartitionId, PartitionState>,
}

/// Open stores on this node, keyed by name
#[derive(Default)]
pub struct StoreRegistry {
    engines: RwLock<HashMap<String, Arc<StorageEngine>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store's engine and register it
    pub fn open_store(&self, config: StoreConfig) -> Result<Arc<StorageEngine>> {
        let mut engines = self.engines.write();
        if engines.contains_key(&config.store_name) {
            return Err(StoreError::Config(format!(
                "store {} is already open",
                config.store_name
            )));
        }

        let engine = Arc::new(StorageEngine::open(config)?);
        engines.insert(engine.store_name().to_string(), Arc::clone(&engine));
        Ok(engine)
    }

    /// Register an engine opened elsewhere
    pub fn register(&self, engine: Arc<StorageEngine>) -> Result<()> {
        let mut engines = self.engines.write();
        let name = engine.store_name().to_string();
        if engines.contains_key(&name) {
            return Err(StoreError::Config(format!("store {} is already open", name)));
        }
        engines.insert(name, engine);
        Ok(())
    }

    pub fn get(&self, store_name: &str) -> Result<Arc<StorageEngine>> {
        self.engines
            .read()
            .get(store_name)
            .cloned()
            .ok_or_else(|| StoreError::StoreNotFound {
                store: store_name.to_string(),
            })
    }

    pub fn contains(&self, store_name: &str) -> bool {
        self.engines.read().contains_key(store_name)
    }

    /// Unregister and close a store
    pub fn close_store(&self, store_name: &str) -> Result<()> {
        let engine = self.engines.write().remove(store_name);
        match engine {
            Some(engine) => engine.close(),
            None => Err(StoreError::StoreNotFound {
                store: store_name.to_string(),
            }),
        }
    }

    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn status(&self) -> Vec<StoreStatus> {
        let mut status: Vec<StoreStatus> = self
            .engines
            .read()
            .values()
            .map(|engine| StoreStatus {
                store_name: engine.store_name().to_string(),
                persistence_type: engine.persistence_type(),
                state: engine.state(),
                partitions: engine.partition_states(),
            })
            .collect();
        status.sort_by(|a, b| a.store_name.cmp(&b.store_name));
        status
    }

    /// Close every store; reports the first failure after trying all
    pub fn close_all(&self) -> Result<()> {
        let engines: Vec<_> = self.engines.write().drain().map(|(_, e)| e).collect();
        let mut first_err = None;
        for engine in engines {
            if let Err(e) = engine.close() {
                tracing::error!(store = %engine.store_name(), error = %e, "Failed to close store");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
