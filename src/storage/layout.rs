//! Partition directory layout
//!
//! ```text
//! {data_dir}/{store_name}/
//!   ├── partition_000000/
//!   │     ├── wal.log
//!   │     └── checkpoint.dat
//!   └── .staging/
//!         └── partition_000005.<session>/
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::partition::PartitionId;

/// Resolves on-disk paths for one store
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    store_dir: PathBuf,
}

impl PartitionLayout {
    const PARTITION_PREFIX: &'static str = "partition_";
    const STAGING_DIR: &'static str = ".staging";
    const WAL_FILENAME: &'static str = "wal.log";
    const CHECKPOINT_FILENAME: &'static str = "checkpoint.dat";

    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
        }
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Directory of a published partition
    pub fn partition_dir(&self, partition: PartitionId) -> PathBuf {
        self.store_dir.join(Self::partition_dir_name(partition))
    }

    pub fn staging_root(&self) -> PathBuf {
        self.store_dir.join(Self::STAGING_DIR)
    }

    /// Directory of an in-progress transfer for `partition`
    pub fn staging_dir(&self, partition: PartitionId, session: u64) -> PathBuf {
        self.staging_root()
            .join(format!("{}.{}", Self::partition_dir_name(partition), session))
    }

    pub fn wal_path(dir: &Path) -> PathBuf {
        dir.join(Self::WAL_FILENAME)
    }

    pub fn checkpoint_path(dir: &Path) -> PathBuf {
        dir.join(Self::CHECKPOINT_FILENAME)
    }

    /// Partition ids that have a directory on disk, ascending
    pub fn discover(&self) -> Result<Vec<PartitionId>> {
        let entries = match fs::read_dir(&self.store_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = Self::parse_partition_id(&entry.path()) {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    /// Remove everything under the staging root (leftovers from a crash)
    pub fn clear_staging(&self) -> Result<usize> {
        let root = self.staging_root();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            remove_dir_if_exists(&entry?.path())?;
            removed += 1;
        }
        Ok(removed)
    }

    fn partition_dir_name(partition: PartitionId) -> String {
        format!("{}{:06}", Self::PARTITION_PREFIX, partition)
    }

    /// "partition_000042" → Some(42)
    fn parse_partition_id(path: &Path) -> Option<PartitionId> {
        let name = path.file_name()?.to_str()?;
        let id_str = name.strip_prefix(Self::PARTITION_PREFIX)?;
        if id_str.is_empty() || !id_str.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        id_str.parse().ok()
    }
}

/// `remove_dir_all` that treats a missing directory as success
pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
