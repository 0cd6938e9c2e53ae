//! Checkpoint Writer
//!
//! Writes sorted key-value entries to a new checkpoint file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

use super::{Checkpoint, HEADER_SIZE, MAGIC, VERSION};

/// Builder for checkpoint files
pub struct CheckpointWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
    /// Bytes written to the data block so far
    data_len: u64,
    /// Last key written, to enforce ascending order
    last_key: Option<Vec<u8>>,
    data_hasher: crc32fast::Hasher,
}

impl CheckpointWriter {
    /// Create a new checkpoint writer
    ///
    /// Writes the header immediately; call `add()` in ascending key order,
    /// then `finish()` to write the footer.
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?; // Entry count, patched in finish

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            entry_count: 0,
            data_len: 0,
            last_key: None,
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Add a key-value pair (keys must be strictly ascending)
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last.as_slice() {
                return Err(StoreError::Corruption(format!(
                    "checkpoint keys out of order in {}",
                    self.path.display()
                )));
            }
        }

        let key_len_bytes = (key.len() as u32).to_le_bytes();
        let val_len_bytes = (value.len() as u32).to_le_bytes();

        for part in [&key_len_bytes[..], &val_len_bytes[..], key, value] {
            self.writer.write_all(part)?;
            self.data_hasher.update(part);
        }

        self.data_len += 8 + key.len() as u64 + value.len() as u64;
        self.entry_count += 1;
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    /// Finish: write footer, patch the header count, fsync
    pub fn finish(mut self) -> Result<Checkpoint> {
        let data_crc = self.data_hasher.clone().finalize();

        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(&self.data_len.to_le_bytes())?;
        self.writer.flush()?;

        let mut file = self.writer.into_inner().map_err(|e| {
            StoreError::Corruption(format!("failed to flush checkpoint: {}", e))
        })?;
        file.seek(SeekFrom::Start(HEADER_SIZE - 8))?; // After magic + version
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();

        Ok(Checkpoint {
            path: self.path,
            entry_count: self.entry_count,
            data_crc,
            file_size,
        })
    }
}
