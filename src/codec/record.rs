//! Record slot encoding
//!
//! ```text
//! ┌─────┬─────┬────────┬──────────┬──────┬──────────┬───────┬─────┐
//! │Tag 1│Rsv 3│KeyLen 4│Capacity 8│Next 8│ValueLen 8│CRC32 4│Rsv 4│
//! └─────┴─────┴────────┴──────────┴──────┴──────────┴───────┴─────┘
//! followed by Capacity payload bytes: Key | Value | slack
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{HashKvError, Result};

/// Slot header size on disk
pub const SLOT_HEADER_SIZE: u64 = 40;

/// Byte offset of the `next` field inside a slot header
pub const NEXT_FIELD_OFFSET: u64 = 16;

/// Slot state marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotTag {
    Live = b'L',
    Free = b'F',
}

impl SlotTag {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'L' => Some(SlotTag::Live),
            b'F' => Some(SlotTag::Free),
            _ => None,
        }
    }
}

/// Decoded slot header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    pub tag: SlotTag,
    pub key_len: u32,
    /// Payload bytes reserved after the header
    pub capacity: u64,
    /// Next slot in the bucket chain (live) or free list (free); 0 ends it
    pub next: u64,
    pub value_len: u64,
    pub crc: u32,
}

impl SlotHeader {
    /// Header for a live record
    pub fn live(key: &[u8], value: &[u8], capacity: u64, next: u64) -> Self {
        Self {
            tag: SlotTag::Live,
            key_len: key.len() as u32,
            capacity,
            next,
            value_len: value.len() as u64,
            crc: record_crc(key, value),
        }
    }

    /// Header for a reclaimed slot
    pub fn free(capacity: u64, next: u64) -> Self {
        Self {
            tag: SlotTag::Free,
            key_len: 0,
            capacity,
            next,
            value_len: 0,
            crc: 0,
        }
    }

    /// Total bytes the slot occupies, header included (saturates on
    /// damaged capacities so bounds checks still reject them)
    pub fn slot_size(&self) -> u64 {
        SLOT_HEADER_SIZE.saturating_add(self.capacity)
    }

    /// Bytes of key plus value (saturating, see `slot_size`)
    pub fn payload_len(&self) -> u64 {
        (self.key_len as u64).saturating_add(self.value_len)
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag as u8);
        buf.put_bytes(0, 3);
        buf.put_u32_le(self.key_len);
        buf.put_u64_le(self.capacity);
        buf.put_u64_le(self.next);
        buf.put_u64_le(self.value_len);
        buf.put_u32_le(self.crc);
        buf.put_bytes(0, 4);
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(SLOT_HEADER_SIZE as usize);
        self.encode_into(&mut buf);
        buf
    }

    /// Decode a slot header; `offset` is only used in error messages
    pub fn decode(mut bytes: &[u8], offset: u64) -> Result<Self> {
        if bytes.len() < SLOT_HEADER_SIZE as usize {
            return Err(HashKvError::corrupt(format!(
                "slot header at {} truncated",
                offset
            )));
        }

        let tag_byte = bytes.get_u8();
        let tag = SlotTag::from_byte(tag_byte).ok_or_else(|| {
            HashKvError::corrupt(format!("invalid slot tag 0x{:02x} at {}", tag_byte, offset))
        })?;
        bytes.advance(3);
        let key_len = bytes.get_u32_le();
        let capacity = bytes.get_u64_le();
        let next = bytes.get_u64_le();
        let value_len = bytes.get_u64_le();
        let crc = bytes.get_u32_le();

        let header = Self {
            tag,
            key_len,
            capacity,
            next,
            value_len,
            crc,
        };

        let payload = (key_len as u64).checked_add(value_len).ok_or_else(|| {
            HashKvError::corrupt(format!(
                "slot at {} has overflowing lengths: key {} value {}",
                offset, key_len, value_len
            ))
        })?;
        if header.capacity > u64::MAX - SLOT_HEADER_SIZE {
            return Err(HashKvError::corrupt(format!(
                "slot at {} has impossible capacity {}",
                offset, header.capacity
            )));
        }
        if payload > header.capacity {
            return Err(HashKvError::corrupt(format!(
                "slot at {} holds {} payload bytes but has capacity {}",
                offset, payload, header.capacity
            )));
        }

        Ok(header)
    }

    /// Check a fully read record against the stored checksum
    pub fn verify(&self, key: &[u8], value: &[u8], offset: u64) -> Result<()> {
        let actual = record_crc(key, value);
        if actual != self.crc {
            return Err(HashKvError::corrupt(format!(
                "record checksum mismatch at {}: stored {:08x}, computed {:08x}",
                offset, self.crc, actual
            )));
        }
        Ok(())
    }
}

/// Payload bytes needed to store a record
pub fn payload_size(key: &[u8], value: &[u8]) -> u64 {
    key.len() as u64 + value.len() as u64
}

/// CRC32 over the lengths, key and value
pub fn record_crc(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&(key.len() as u32).to_le_bytes());
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Keys are length-prefixed with a u32
pub fn check_key(key: &[u8]) -> Result<()> {
    if key.len() > u32::MAX as usize {
        return Err(HashKvError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("key of {} bytes exceeds the u32 length limit", key.len()),
        )));
    }
    Ok(())
}

/// Encode header + key + value (slack is not written)
pub fn encode_record(key: &[u8], value: &[u8], capacity: u64, next: u64) -> Result<BytesMut> {
    check_key(key)?;
    let payload = payload_size(key, value);
    if payload > capacity {
        return Err(HashKvError::corrupt(format!(
            "record of {} bytes does not fit slot capacity {}",
            payload, capacity
        )));
    }

    let mut buf = BytesMut::with_capacity(SLOT_HEADER_SIZE as usize + payload as usize);
    SlotHeader::live(key, value, capacity, next).encode_into(&mut buf);
    buf.put_slice(key);
    buf.put_slice(value);
    Ok(buf)
}
