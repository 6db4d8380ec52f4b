//! Table Module
//!
//! The on-disk hash table: bucket array plus free space.
//!
//! ## Responsibilities
//! - Map keys to buckets and walk bucket chains
//! - Keep the bucket array mirrored in memory (write-through)
//! - Track reclaimed slots and hand them back out before growing the file
//!
//! ## Collision Policy
//! Separate chaining: each bucket head points at the first live slot and
//! slots link through their `next` field. Bucket count is fixed when the
//! file is created, so lookups degrade to chain length on overfull tables.
//!
//! ## Recovery
//! A file left dirty by a handle that never closed, or whose length
//! disagrees with its header, is rebuilt from what the bucket chains reach
//! (see `recovery`).
//!
//! ## Allocation Policy
//! First-fit (default) or best-fit over a singly linked free list, with
//! splitting of oversized slots. Adjacent free slots are never merged:
//! fragmentation is accepted in exchange for a simple allocator.

mod allocator;
mod buckets;
mod recovery;

pub use allocator::{Allocation, Allocator, FreeSlot, MIN_SPLIT_PAYLOAD, SLOT_ALIGN};
pub use buckets::{BucketTable, Located, Lookup};
pub use recovery::{recover, Recovered, RecoveryReport};

use crate::codec::{SlotHeader, SlotTag, SLOT_HEADER_SIZE};
use crate::error::{HashKvError, Result};
use crate::storage::DataFile;

/// Bounds of the data region, used to reject dangling offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Upper bound on the number of slots that fit; longer chains must loop
    pub fn max_slots(&self) -> u64 {
        self.end.saturating_sub(self.start) / SLOT_HEADER_SIZE + 1
    }

    fn contains_slot(&self, offset: u64) -> bool {
        offset >= self.start && offset.saturating_add(SLOT_HEADER_SIZE) <= self.end
    }
}

/// Read and check a slot header, expecting the given tag
pub fn read_slot_header(
    file: &mut DataFile,
    offset: u64,
    region: Region,
    expected: SlotTag,
) -> Result<SlotHeader> {
    let header = read_any_slot_header(file, offset, region)?;
    if header.tag != expected {
        return Err(HashKvError::corrupt(format!(
            "slot at {} is {:?}, expected {:?}",
            offset, header.tag, expected
        )));
    }
    Ok(header)
}

/// Read a slot header of either tag that lies wholly inside `region`
pub fn read_any_slot_header(file: &mut DataFile, offset: u64, region: Region) -> Result<SlotHeader> {
    if !region.contains_slot(offset) {
        return Err(HashKvError::corrupt(format!(
            "slot offset {} outside data region {}..{}",
            offset, region.start, region.end
        )));
    }

    let mut raw = [0u8; SLOT_HEADER_SIZE as usize];
    file.read_at(offset, &mut raw)?;
    let header = SlotHeader::decode(&raw, offset)?;

    let end = offset.checked_add(header.slot_size()).ok_or_else(|| {
        HashKvError::corrupt(format!("slot at {} has overflowing size", offset))
    })?;
    if end > region.end {
        return Err(HashKvError::corrupt(format!(
            "slot at {} with capacity {} runs past end of file {}",
            offset, header.capacity, region.end
        )));
    }

    Ok(header)
}
