//! Free space allocator
//!
//! Reclaimed slots form a singly linked list on disk (`free_head` in the
//! file header, then each slot's `next`). The list is mirrored in memory
//! in the same order: index 0 is the head.

use std::collections::VecDeque;

use crate::codec::{SlotHeader, SlotTag, NEXT_FIELD_OFFSET, SLOT_HEADER_SIZE};
use crate::config::FitPolicy;
use crate::error::{HashKvError, Result};
use crate::storage::DataFile;

use super::{read_slot_header, Region};

/// Payload capacities are rounded up to this many bytes
pub const SLOT_ALIGN: u64 = 8;

/// Smallest payload worth splitting off into its own free slot
pub const MIN_SPLIT_PAYLOAD: u64 = 16;

/// A reclaimed slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSlot {
    pub offset: u64,
    pub capacity: u64,
}

impl FreeSlot {
    pub fn slot_size(&self) -> u64 {
        SLOT_HEADER_SIZE + self.capacity
    }
}

/// Space handed out for a new record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub offset: u64,
    pub capacity: u64,
    /// True when the slot lies past the previous end of file
    pub extended: bool,
}

/// Free list plus file high-water mark
#[derive(Debug)]
pub struct Allocator {
    free: VecDeque<FreeSlot>,
    policy: FitPolicy,
    high_water: u64,
    free_bytes: u64,
}

impl Allocator {
    /// Allocator with no free slots
    pub fn new(policy: FitPolicy, high_water: u64) -> Self {
        Self {
            free: VecDeque::new(),
            policy,
            high_water,
            free_bytes: 0,
        }
    }

    /// Rebuild the in-memory list by walking the on-disk chain
    pub fn load(file: &mut DataFile, head: u64, region: Region, policy: FitPolicy) -> Result<Self> {
        let mut allocator = Self::new(policy, region.end);
        let mut offset = head;

        while offset != 0 {
            if allocator.free.len() as u64 >= region.max_slots() {
                return Err(HashKvError::corrupt("cycle detected in free list"));
            }
            let header = read_slot_header(file, offset, region, SlotTag::Free)?;
            let slot = FreeSlot {
                offset,
                capacity: header.capacity,
            };
            allocator.free_bytes += slot.slot_size();
            allocator.free.push_back(slot);
            offset = header.next;
        }

        Ok(allocator)
    }

    /// Replace the on-disk free list with `slots`, linked in the given order
    pub fn rebuild(
        file: &mut DataFile,
        slots: Vec<FreeSlot>,
        policy: FitPolicy,
        high_water: u64,
    ) -> Result<Self> {
        let mut allocator = Self::new(policy, high_water);
        for (index, slot) in slots.iter().enumerate() {
            let next = slots.get(index + 1).map(|slot| slot.offset).unwrap_or(0);
            file.write_at(slot.offset, &SlotHeader::free(slot.capacity, next).encode())?;
            allocator.free_bytes += slot.slot_size();
        }
        allocator.free = slots.into();
        Ok(allocator)
    }

    /// Offset of the first free slot (0 = none)
    pub fn head(&self) -> u64 {
        self.free.front().map(|slot| slot.offset).unwrap_or(0)
    }

    /// End of the last allocated slot
    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Bytes held by free slots, headers included
    pub fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// Free slots in list order
    pub fn iter(&self) -> impl Iterator<Item = &FreeSlot> {
        self.free.iter()
    }

    /// Reserve room for `payload` bytes, reusing a free slot when possible
    pub fn allocate(&mut self, file: &mut DataFile, payload: u64) -> Result<Allocation> {
        let needed = align_up(payload);

        let index = match self.pick(needed) {
            Some(index) => index,
            None => {
                let offset = self.high_water;
                self.high_water += SLOT_HEADER_SIZE + needed;
                tracing::trace!(offset, capacity = needed, "allocator: extend file");
                return Ok(Allocation {
                    offset,
                    capacity: needed,
                    extended: true,
                });
            }
        };

        let slot = self.free[index];
        let next = self.next_after(index);
        let remainder = slot.capacity - needed;

        if remainder >= SLOT_HEADER_SIZE + MIN_SPLIT_PAYLOAD {
            let rest = FreeSlot {
                offset: slot.offset + SLOT_HEADER_SIZE + needed,
                capacity: remainder - SLOT_HEADER_SIZE,
            };
            file.write_at(rest.offset, &SlotHeader::free(rest.capacity, next).encode())?;
            self.relink_predecessor(file, index, rest.offset)?;
            self.free[index] = rest;
            self.free_bytes -= SLOT_HEADER_SIZE + needed;
            tracing::trace!(
                offset = slot.offset,
                capacity = needed,
                remainder = rest.capacity,
                "allocator: split free slot"
            );
            return Ok(Allocation {
                offset: slot.offset,
                capacity: needed,
                extended: false,
            });
        }

        self.relink_predecessor(file, index, next)?;
        self.free.remove(index);
        self.free_bytes -= slot.slot_size();
        tracing::trace!(offset = slot.offset, capacity = slot.capacity, "allocator: reuse free slot");
        Ok(Allocation {
            offset: slot.offset,
            capacity: slot.capacity,
            extended: false,
        })
    }

    /// Return a slot to the free list (becomes the new head)
    pub fn release(&mut self, file: &mut DataFile, offset: u64, capacity: u64) -> Result<()> {
        file.write_at(offset, &SlotHeader::free(capacity, self.head()).encode())?;
        let slot = FreeSlot { offset, capacity };
        self.free_bytes += slot.slot_size();
        self.free.push_front(slot);
        tracing::trace!(offset, capacity, "allocator: release slot");
        Ok(())
    }

    /// Forget every free slot and restart allocation at `high_water`
    pub fn reset(&mut self, high_water: u64) {
        self.free.clear();
        self.free_bytes = 0;
        self.high_water = high_water;
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn pick(&self, needed: u64) -> Option<usize> {
        match self.policy {
            FitPolicy::FirstFit => self.free.iter().position(|slot| slot.capacity >= needed),
            FitPolicy::BestFit => self
                .free
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.capacity >= needed)
                .min_by_key(|(_, slot)| slot.capacity)
                .map(|(index, _)| index),
        }
    }

    fn next_after(&self, index: usize) -> u64 {
        self.free.get(index + 1).map(|slot| slot.offset).unwrap_or(0)
    }

    /// Rewrite the on-disk link that points at `free[index]`. The head
    /// link lives in the file header, which the engine persists itself.
    fn relink_predecessor(&mut self, file: &mut DataFile, index: usize, target: u64) -> Result<()> {
        if index > 0 {
            let prev = self.free[index - 1];
            file.write_u64(prev.offset + NEXT_FIELD_OFFSET, target)?;
        }
        Ok(())
    }
}

fn align_up(payload: u64) -> u64 {
    payload.div_ceil(SLOT_ALIGN).max(1) * SLOT_ALIGN
}
