//! Storage Module
//!
//! On-disk building blocks for the durable partition backend.
//!
//! ## Responsibilities
//! - Checkpoint files: a CRC-verified image of a whole partition
//! - Partition directory naming and discovery
//!
//! The write-ahead log lives in [`crate::wal`]; a durable partition is a
//! checkpoint plus the WAL entries appended since it was written.

pub mod checkpoint;
pub(crate) mod layout;

pub use checkpoint::{Checkpoint, CheckpointReader, CheckpointWriter};
pub use layout::PartitionLayout;
