//! Checkpoint Module
//!
//! Sorted, immutable image of one durable partition.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "PCKP" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! │   ... repeated for each entry, strictly ascending keys  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (12 bytes)                                       │
//! │   DataCRC: u32 (4) | DataLen: u64 (8)                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! A checkpoint is written to `<name>.tmp` (`checkpoint.dat.tmp`), fsynced,
//! then renamed over the live file, so readers only ever see a complete one.

mod reader;
mod writer;

use std::fs;
use std::path::{Path, PathBuf};

pub use reader::CheckpointReader;
pub use writer::CheckpointWriter;

use crate::error::Result;

// =============================================================================
// Shared Constants (used by writer and reader)
// =============================================================================

/// Magic bytes identifying a partstore checkpoint file
pub(crate) const MAGIC: &[u8; 4] = b"PCKP";

/// Current checkpoint format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + EntryCount (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: DataCRC (4) + DataLen (8) = 12 bytes
pub(crate) const FOOTER_SIZE: u64 = 12;

// =============================================================================
// Checkpoint Metadata
// =============================================================================

/// Metadata about a finished checkpoint file
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Path to the checkpoint file
    pub path: PathBuf,
    /// Number of entries written
    pub entry_count: u64,
    /// CRC32 of the data block
    pub data_crc: u32,
    /// File size in bytes
    pub file_size: u64,
}

/// Write `entries` (ascending key order) to `path` atomically
pub fn write_atomic<'a, I>(path: &Path, entries: I) -> Result<Checkpoint>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let scratch = tmp_path(path);

    let mut writer = CheckpointWriter::new(&scratch)?;
    for (key, value) in entries {
        writer.add(key, value)?;
    }
    let mut checkpoint = writer.finish()?;

    fs::rename(&scratch, path)?;
    sync_dir(path.parent())?;

    checkpoint.path = path.to_path_buf();
    Ok(checkpoint)
}

/// Scratch file a checkpoint is written to before the rename
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// fsync a directory so a rename inside it is durable
pub(crate) fn sync_dir(dir: Option<&Path>) -> Result<()> {
    #[cfg(unix)]
    if let Some(dir) = dir {
        fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
