//! Bucket array
//!
//! In-memory mirror of the on-disk chain heads. Every change is written
//! through immediately; reads never touch the disk.

use crate::codec::{bucket_index, SlotHeader, SlotTag, BUCKET_ENTRY_SIZE, HEADER_SIZE, SLOT_HEADER_SIZE};
use crate::error::{HashKvError, Result};
use crate::storage::DataFile;

use super::{read_slot_header, Region};

/// Zero-fill chunk size when resetting the bucket array
const RESET_CHUNK: usize = 64 * 1024;

/// A live slot found by key
#[derive(Debug, Clone, Copy)]
pub struct Located {
    pub bucket: usize,
    pub offset: u64,
    /// Predecessor in the chain (None = bucket head)
    pub prev: Option<u64>,
    pub header: SlotHeader,
}

/// Result of a chain walk
#[derive(Debug, Clone, Copy)]
pub enum Lookup {
    Found(Located),
    /// Key absent; `tail` is the last slot of the chain, if any
    Missing { bucket: usize, tail: Option<u64> },
}

/// Chain heads for every bucket
#[derive(Debug)]
pub struct BucketTable {
    heads: Vec<u64>,
}

impl BucketTable {
    /// Table with every bucket empty (in memory only)
    pub fn empty(bucket_count: u64) -> Self {
        Self {
            heads: vec![0; bucket_count as usize],
        }
    }

    /// Load the bucket array from disk and bounds-check every head
    pub fn load(file: &mut DataFile, bucket_count: u64, region: Region) -> Result<Self> {
        let raw = file.read_vec(HEADER_SIZE, bucket_count * BUCKET_ENTRY_SIZE)?;

        let mut heads = Vec::with_capacity(bucket_count as usize);
        for (index, chunk) in raw.chunks_exact(BUCKET_ENTRY_SIZE as usize).enumerate() {
            let mut entry = [0u8; BUCKET_ENTRY_SIZE as usize];
            entry.copy_from_slice(chunk);
            let head = u64::from_le_bytes(entry);

            if head != 0 && !region.contains_slot(head) {
                return Err(HashKvError::corrupt(format!(
                    "bucket {} head {} outside data region {}..{}",
                    index, head, region.start, region.end
                )));
            }
            heads.push(head);
        }

        Ok(Self { heads })
    }

    /// Number of buckets
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Bucket a key hashes to
    pub fn bucket_for(&self, key: &[u8]) -> usize {
        bucket_index(key, self.heads.len() as u64)
    }

    /// First slot of a bucket (0 = empty)
    pub fn head(&self, bucket: usize) -> u64 {
        self.heads[bucket]
    }

    /// Point a bucket at a new first slot
    pub fn set_head(&mut self, file: &mut DataFile, bucket: usize, offset: u64) -> Result<()> {
        file.write_u64(HEADER_SIZE + bucket as u64 * BUCKET_ENTRY_SIZE, offset)?;
        self.heads[bucket] = offset;
        Ok(())
    }

    /// Empty every bucket on disk and in memory
    pub fn reset(&mut self, file: &mut DataFile) -> Result<()> {
        let total = self.heads.len() * BUCKET_ENTRY_SIZE as usize;
        let zeros = vec![0u8; total.min(RESET_CHUNK)];
        let mut written = 0;
        while written < total {
            let n = (total - written).min(zeros.len());
            file.write_at(HEADER_SIZE + written as u64, &zeros[..n])?;
            written += n;
        }
        self.heads.iter_mut().for_each(|head| *head = 0);
        Ok(())
    }

    /// First non-empty bucket at or after `from`
    pub fn next_occupied(&self, from: usize) -> Option<usize> {
        self.heads
            .iter()
            .skip(from)
            .position(|&head| head != 0)
            .map(|pos| from + pos)
    }

    /// Walk the key's chain comparing stored keys byte-for-byte
    pub fn find(&self, file: &mut DataFile, key: &[u8], region: Region) -> Result<Lookup> {
        let bucket = self.bucket_for(key);
        let mut offset = self.heads[bucket];
        let mut prev = None;
        let mut steps = 0u64;

        while offset != 0 {
            steps += 1;
            if steps > region.max_slots() {
                return Err(HashKvError::corrupt(format!(
                    "cycle detected in chain of bucket {}",
                    bucket
                )));
            }

            let header = read_slot_header(file, offset, region, SlotTag::Live)?;
            if header.key_len as usize == key.len() {
                let stored = file.read_vec(offset + SLOT_HEADER_SIZE, header.key_len as u64)?;
                if stored == key {
                    return Ok(Lookup::Found(Located {
                        bucket,
                        offset,
                        prev,
                        header,
                    }));
                }
            }

            prev = Some(offset);
            offset = header.next;
        }

        Ok(Lookup::Missing { bucket, tail: prev })
    }
}
