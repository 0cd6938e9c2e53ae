//! Partition snapshots
//!
//! A snapshot is the full content of one partition, encoded for transfer.
//!
//! ## Format
//! ```text
//! ┌────────────┬─────────────┬─────────────────────────────────────────┐
//! │ "PSNP" (4) │ version (2) │ entries...                              │
//! └────────────┴─────────────┴─────────────────────────────────────────┘
//!
//! entry: [key_len: u32 LE][val_len: u32 LE][key][value]   (key order)
//! ```
//!
//! [`SnapshotMetadata`] travels beside the body and carries the byte length,
//! entry count and CRC32 of the whole body. The receiver checks all three.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::partition::Partition;

/// Magic bytes at the start of every snapshot body
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"PSNP";

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u16 = 1;

/// magic (4) + version (2)
pub const SNAPSHOT_HEADER_SIZE: usize = 6;

/// key_len (4) + val_len (4)
const ENTRY_HEADER_SIZE: usize = 8;

/// Integrity record for one snapshot body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub entry_count: u64,
    pub byte_len: u64,
    pub checksum: u32,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Encoded partition content plus its integrity record
///
/// Cloning is cheap: the body is a shared `Bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    metadata: SnapshotMetadata,
    data: Bytes,
}

impl Snapshot {
    /// Encode entries that are already in ascending key order
    pub fn encode<I, K, V>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut buf = BytesMut::new();
        buf.put_slice(SNAPSHOT_MAGIC);
        buf.put_u16_le(SNAPSHOT_VERSION);

        let mut entry_count = 0u64;
        for (key, value) in entries {
            let (key, value) = (key.as_ref(), value.as_ref());
            buf.put_u32_le(encode_len(key.len(), "key")?);
            buf.put_u32_le(encode_len(value.len(), "value")?);
            buf.put_slice(key);
            buf.put_slice(value);
            entry_count += 1;
        }

        let data = buf.freeze();
        let metadata = SnapshotMetadata {
            entry_count,
            byte_len: data.len() as u64,
            checksum: crc32fast::hash(&data),
        };
        Ok(Self { metadata, data })
    }

    /// Encode the current content of an active partition
    ///
    /// Reads through a snapshot iterator, so concurrent writes are not seen.
    pub fn capture(partition: &Partition) -> Result<Self> {
        let snapshot = Self::encode(partition.entries()?)?;
        tracing::debug!(
            store = %partition.store_name(),
            partition = partition.partition_id(),
            entries = snapshot.metadata.entry_count,
            bytes = snapshot.metadata.byte_len,
            "Captured partition snapshot"
        );
        Ok(snapshot)
    }

    /// Reassemble a snapshot received elsewhere; call [`Snapshot::verify`]
    /// before trusting it
    pub fn from_parts(metadata: SnapshotMetadata, data: Bytes) -> Self {
        Self { metadata, data }
    }

    pub fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_parts(self) -> (SnapshotMetadata, Bytes) {
        (self.metadata, self.data)
    }

    pub fn entry_count(&self) -> u64 {
        self.metadata.entry_count
    }

    pub fn byte_len(&self) -> u64 {
        self.metadata.byte_len
    }

    /// Split the body into chunks of at most `chunk_size` bytes
    pub fn chunks(&self, chunk_size: usize) -> impl Iterator<Item = Bytes> + '_ {
        let chunk_size = chunk_size.max(1);
        (0..self.data.len())
            .step_by(chunk_size)
            .map(move |start| self.data.slice(start..(start + chunk_size).min(self.data.len())))
    }

    /// Check the body against the metadata
    pub fn verify(&self) -> Result<()> {
        self.decode().map(|_| ())
    }

    /// Decode every entry, verifying integrity
    pub fn decode(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        let mut decoder = SnapshotDecoder::new(self.metadata);
        decoder.feed(&self.data, |key, value| {
            entries.push((key.to_vec(), value.to_vec()));
            Ok(())
        })?;
        decoder.finish()?;
        Ok(entries)
    }
}

fn encode_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| StoreError::Corruption(format!("{} of {} bytes is too large", what, len)))
}

// =============================================================================
// Streaming Decoder
// =============================================================================

/// Incremental snapshot decoder
///
/// Chunks may split the header or any entry at arbitrary byte offsets.
/// Every complete entry is handed to the sink as soon as it is available.
/// Length and count overruns are reported while streaming; the checksum
/// only in [`SnapshotDecoder::finish`].
pub struct SnapshotDecoder {
    expected: SnapshotMetadata,
    buffer: BytesMut,
    hasher: crc32fast::Hasher,
    bytes_seen: u64,
    entries_seen: u64,
    header_checked: bool,
}

impl SnapshotDecoder {
    pub fn new(expected: SnapshotMetadata) -> Self {
        Self {
            expected,
            buffer: BytesMut::new(),
            hasher: crc32fast::Hasher::new(),
            bytes_seen: 0,
            entries_seen: 0,
            header_checked: false,
        }
    }

    /// Consume one chunk, passing each complete entry to `sink`
    pub fn feed<F>(&mut self, chunk: &[u8], mut sink: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        self.bytes_seen += chunk.len() as u64;
        if self.bytes_seen > self.expected.byte_len {
            return Err(StoreError::Corruption(format!(
                "snapshot body exceeds declared length of {} bytes",
                self.expected.byte_len
            )));
        }
        self.hasher.update(chunk);
        self.buffer.extend_from_slice(chunk);

        if !self.header_checked {
            if self.buffer.len() < SNAPSHOT_HEADER_SIZE {
                return Ok(());
            }
            self.check_header()?;
        }

        loop {
            if self.buffer.len() < ENTRY_HEADER_SIZE {
                return Ok(());
            }
            let mut header = &self.buffer[..ENTRY_HEADER_SIZE];
            let key_len = header.get_u32_le() as usize;
            let val_len = header.get_u32_le() as usize;

            let frame_len = ENTRY_HEADER_SIZE + key_len + val_len;
            if self.buffer.len() < frame_len {
                return Ok(());
            }

            self.entries_seen += 1;
            if self.entries_seen > self.expected.entry_count {
                return Err(StoreError::Corruption(format!(
                    "snapshot holds more than the declared {} entries",
                    self.expected.entry_count
                )));
            }

            let frame = self.buffer.split_to(frame_len);
            let key = &frame[ENTRY_HEADER_SIZE..ENTRY_HEADER_SIZE + key_len];
            let value = &frame[ENTRY_HEADER_SIZE + key_len..];
            sink(key, value)?;
        }
    }

    /// Verify the stream ended exactly where the metadata says it should
    pub fn finish(self) -> Result<()> {
        if !self.header_checked {
            return Err(StoreError::Corruption(
                "snapshot ended before its header".to_string(),
            ));
        }
        if !self.buffer.is_empty() {
            return Err(StoreError::Corruption(format!(
                "snapshot ended inside an entry ({} trailing bytes)",
                self.buffer.len()
            )));
        }
        if self.bytes_seen != self.expected.byte_len {
            return Err(StoreError::Corruption(format!(
                "snapshot length mismatch: expected {} bytes, got {}",
                self.expected.byte_len, self.bytes_seen
            )));
        }
        if self.entries_seen != self.expected.entry_count {
            return Err(StoreError::Corruption(format!(
                "snapshot entry count mismatch: expected {}, got {}",
                self.expected.entry_count, self.entries_seen
            )));
        }

        let checksum = self.hasher.finalize();
        if checksum != self.expected.checksum {
            return Err(StoreError::Corruption(format!(
                "snapshot checksum mismatch: expected {:08x}, got {:08x}",
                self.expected.checksum, checksum
            )));
        }
        Ok(())
    }

    fn check_header(&mut self) -> Result<()> {
        if &self.buffer[..4] != SNAPSHOT_MAGIC {
            return Err(StoreError::Corruption(
                "invalid snapshot magic".to_string(),
            ));
        }
        let version = (&self.buffer[4..SNAPSHOT_HEADER_SIZE]).get_u16_le();
        if version != SNAPSHOT_VERSION {
            return Err(StoreError::Corruption(format!(
                "unsupported snapshot version {}",
                version
            )));
        }
        self.buffer.advance(SNAPSHOT_HEADER_SIZE);
        self.header_checked = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot::encode([
            (b"a".as_slice(), b"1".as_slice()),
            (b"bb".as_slice(), b"".as_slice()),
            (b"ccc".as_slice(), b"333".as_slice()),
        ])
        .unwrap()
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let snapshot = sample();
        let mut decoder = SnapshotDecoder::new(snapshot.metadata());
        let mut keys = Vec::new();
        for byte in snapshot.data().iter() {
            decoder
                .feed(&[*byte], |k, _| {
                    keys.push(k.to_vec());
                    Ok(())
                })
                .unwrap();
        }
        decoder.finish().unwrap();
        assert_eq!(keys, vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);
    }

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let snapshot = sample();
        let mut data = snapshot.data().to_vec();
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let tampered = Snapshot::from_parts(snapshot.metadata(), Bytes::from(data));
        let err = tampered.verify().unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let snapshot = sample();
        let short = snapshot.data().slice(..snapshot.data().len() - 2);
        let err = Snapshot::from_parts(snapshot.metadata(), short)
            .verify()
            .unwrap_err();
        assert!(matches!(err, StoreError::Corruption(_)));
    }

    #[test]
    fn test_empty_partition_snapshot() {
        let snapshot = Snapshot::encode(Vec::<(Vec<u8>, Vec<u8>)>::new()).unwrap();
        assert_eq!(snapshot.entry_count(), 0);
        assert_eq!(snapshot.byte_len(), SNAPSHOT_HEADER_SIZE as u64);
        assert!(snapshot.decode().unwrap().is_empty());
    }

    #[test]
    fn test_chunks_cover_body() {
        let snapshot = sample();
        let joined: Vec<u8> = snapshot.chunks(4).flat_map(|c| c.to_vec()).collect();
        assert_eq!(joined, snapshot.data().to_vec());
        assert!(snapshot.chunks(4).all(|c| c.len() <= 4));
    }
}
