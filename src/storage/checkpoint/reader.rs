//! Checkpoint Reader
//!
//! Loads a checkpoint file, verifying its header, footer and data CRC.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, StoreError};

use super::{FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Verified, fully loaded checkpoint
#[derive(Debug)]
pub struct CheckpointReader {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    data_crc: u32,
}

impl CheckpointReader {
    /// Open and verify a checkpoint file
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let corrupt = |msg: String| StoreError::Corruption(format!("{}: {}", path.display(), msg));

        if (bytes.len() as u64) < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt(format!("file too short ({} bytes)", bytes.len())));
        }

        // Header
        if &bytes[0..4] != MAGIC {
            return Err(corrupt(format!(
                "invalid magic: expected PCKP, got {:?}",
                &bytes[0..4]
            )));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(corrupt(format!("unsupported version {}", version)));
        }
        let entry_count = read_u64(&bytes[6..14]);

        // Footer
        let footer_start = bytes.len() - FOOTER_SIZE as usize;
        let data_crc = read_u32(&bytes[footer_start..footer_start + 4]);
        let data_len = read_u64(&bytes[footer_start + 4..]);

        let data = &bytes[HEADER_SIZE as usize..footer_start];
        if data.len() as u64 != data_len {
            return Err(corrupt(format!(
                "data length mismatch: footer says {}, found {}",
                data_len,
                data.len()
            )));
        }

        let actual_crc = crc32fast::hash(data);
        if actual_crc != data_crc {
            return Err(corrupt(format!(
                "CRC mismatch: expected {:08x}, got {:08x}",
                data_crc, actual_crc
            )));
        }

        // Data block
        let mut entries = BTreeMap::new();
        let mut pos = 0;
        while pos < data.len() {
            if pos + 8 > data.len() {
                return Err(corrupt(format!("truncated entry header at {}", pos)));
            }
            let key_len = read_u32(&data[pos..pos + 4]) as usize;
            let val_len = read_u32(&data[pos + 4..pos + 8]) as usize;
            pos += 8;

            if pos + key_len + val_len > data.len() {
                return Err(corrupt(format!("truncated entry body at {}", pos)));
            }
            let key = data[pos..pos + key_len].to_vec();
            pos += key_len;
            let value = data[pos..pos + val_len].to_vec();
            pos += val_len;

            entries.insert(key, value);
        }

        if entries.len() as u64 != entry_count {
            return Err(corrupt(format!(
                "entry count mismatch: header says {}, found {}",
                entry_count,
                entries.len()
            )));
        }

        Ok(Self { entries, data_crc })
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn data_crc(&self) -> u32 {
        self.data_crc
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    /// Take ownership of the loaded entries
    pub fn into_entries(self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.entries
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
