//! MemTable Module
//!
//! In-memory ordered map backing every partition.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Track size for checkpoint decisions
//! - Copy-on-write snapshots for iterators and checkpoints
//!
//! ## Data Structure Choice
//! `BTreeMap` behind an `Arc` inside a `RwLock`:
//! - Ordered keys (required for checkpoints and snapshot encoding)
//! - Taking a snapshot is an `Arc` clone; the next write copies the map
//!   only while a snapshot is still alive

mod table;

pub use table::MemTable;
