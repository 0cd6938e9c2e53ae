//! Persistence types
//!
//! Identifies which storage backend a store uses. Fixed for the lifetime
//! of a store's engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Storage backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PersistenceType {
    /// Non-persistent reference engine. Nothing survives a restart.
    #[default]
    InMemory,

    /// WAL + checkpoint engine. Partitions are recovered at restart.
    Durable,
}

impl PersistenceType {
    /// Whether partitions of this type can be recovered after a restart
    pub fn is_durable(self) -> bool {
        matches!(self, PersistenceType::Durable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PersistenceType::InMemory => "in_memory",
            PersistenceType::Durable => "durable",
        }
    }
}

impl fmt::Display for PersistenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistenceType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in_memory" | "in-memory" | "memory" => Ok(PersistenceType::InMemory),
            "durable" => Ok(PersistenceType::Durable),
            other => Err(StoreError::Config(format!(
                "unknown persistence type: {}",
                other
            ))),
        }
    }
}
