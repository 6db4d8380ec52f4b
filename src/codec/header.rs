//! File header
//!
//! The header is serialized with bincode (fixed-width little-endian
//! integers), so its encoded body always has the same length.

use serde::{Deserialize, Serialize};

use crate::config::MAX_BUCKET_COUNT;
use crate::error::{HashKvError, Result};

/// Magic bytes identifying a HashKV database file
pub const MAGIC: [u8; 4] = *b"HKVD";

/// Current file format version
pub const VERSION: u16 = 1;

/// Header size on disk, including CRC and padding
pub const HEADER_SIZE: u64 = 64;

/// Size of one bucket array entry (chain head offset)
pub const BUCKET_ENTRY_SIZE: u64 = 8;

/// Header flag: a handle has written since the last sync or close
pub const FLAG_DIRTY: u16 = 0x0001;

/// Encoded body: Magic (4) + Version (2) + Flags (2) + 4 * u64 (32) = 40 bytes
const BODY_SIZE: usize = 40;

/// Persisted table metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub version: u16,
    /// `FLAG_DIRTY` or zero
    pub flags: u16,
    pub bucket_count: u64,
    /// Live records reachable from the bucket array
    pub record_count: u64,
    /// High-water mark; equals the physical file length once committed
    pub file_size: u64,
    /// Offset of the first free slot (0 = none)
    pub free_head: u64,
}

impl FileHeader {
    /// Header of a freshly created, empty file
    pub fn new(bucket_count: u64) -> Self {
        let mut header = Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            bucket_count,
            record_count: 0,
            file_size: 0,
            free_head: 0,
        };
        header.file_size = header.data_start();
        header
    }

    /// True when the last handle did not reach sync or close after writing
    pub fn is_dirty(&self) -> bool {
        self.flags & FLAG_DIRTY != 0
    }

    /// First byte after the bucket array
    pub fn data_start(&self) -> u64 {
        HEADER_SIZE + self.bucket_count * BUCKET_ENTRY_SIZE
    }

    /// Encode to exactly `HEADER_SIZE` bytes
    pub fn encode(&self) -> Result<[u8; HEADER_SIZE as usize]> {
        let body = bincode::serialize(self)?;
        if body.len() != BODY_SIZE {
            return Err(HashKvError::Serialization(format!(
                "header body is {} bytes, expected {}",
                body.len(),
                BODY_SIZE
            )));
        }

        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..BODY_SIZE].copy_from_slice(&body);
        let crc = crc32fast::hash(&body);
        buf[BODY_SIZE..BODY_SIZE + 4].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decode and validate a header
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(HashKvError::corrupt(format!(
                "header truncated: {} bytes",
                bytes.len()
            )));
        }

        if bytes[0..4] != MAGIC {
            return Err(HashKvError::corrupt(format!(
                "invalid magic: expected HKVD, got {:?}",
                &bytes[0..4]
            )));
        }

        let body = &bytes[..BODY_SIZE];
        let stored_crc = u32::from_le_bytes([
            bytes[BODY_SIZE],
            bytes[BODY_SIZE + 1],
            bytes[BODY_SIZE + 2],
            bytes[BODY_SIZE + 3],
        ]);
        let actual_crc = crc32fast::hash(body);
        if stored_crc != actual_crc {
            return Err(HashKvError::corrupt(format!(
                "header checksum mismatch: stored {:08x}, computed {:08x}",
                stored_crc, actual_crc
            )));
        }

        let header: FileHeader = bincode::deserialize(body)
            .map_err(|e| HashKvError::corrupt(format!("unreadable header: {}", e)))?;

        if header.version != VERSION {
            return Err(HashKvError::corrupt(format!(
                "unsupported format version: {}",
                header.version
            )));
        }
        if header.bucket_count == 0 || header.bucket_count > MAX_BUCKET_COUNT {
            return Err(HashKvError::corrupt(format!(
                "invalid bucket count: {}",
                header.bucket_count
            )));
        }
        if header.file_size < header.data_start() {
            return Err(HashKvError::corrupt(format!(
                "file size {} smaller than bucket table end {}",
                header.file_size,
                header.data_start()
            )));
        }
        if header.free_head != 0
            && (header.free_head < header.data_start() || header.free_head >= header.file_size)
        {
            return Err(HashKvError::corrupt(format!(
                "free list head {} outside data region",
                header.free_head
            )));
        }

        Ok(header)
    }
}
