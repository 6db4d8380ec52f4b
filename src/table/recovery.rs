//! Crash recovery
//!
//! A handle marks the header dirty before its first write and clears the
//! mark on sync or close. When a file is opened dirty, or its length
//! disagrees with the header, the table is rebuilt from the bucket chains:
//!
//! 1. Walk the data region slot by slot. A torn slot at or past the last
//!    committed size ends the walk and is cut off
//! 2. Walk every chain; the slots it reaches are the live records
//! 3. Every other slot is free; free slots at the end of the file are
//!    truncated away
//! 4. Rewrite the free list, record count, file size and flags
//!
//! Slots are always written in full before anything links to them, and a
//! slot is only released after its last link is gone, so a chain never
//! reaches a half-written record.

use std::collections::HashSet;

use crate::codec::{FileHeader, SlotTag, FLAG_DIRTY, SLOT_HEADER_SIZE};
use crate::config::FitPolicy;
use crate::error::{HashKvError, Result};
use crate::storage::DataFile;

use super::{read_any_slot_header, read_slot_header, Allocator, BucketTable, FreeSlot, Region};

/// Result of a recovery pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records reachable from the bucket array
    pub live_records: u64,

    /// Live-tagged slots no chain reached (interrupted writes, moves or removes)
    pub orphaned_slots: u64,

    /// Slots on the rebuilt free list
    pub free_slots: u64,

    /// Bytes cut from the end of the file
    pub truncated_bytes: u64,
}

/// Table state rebuilt by `recover`
#[derive(Debug)]
pub struct Recovered {
    pub buckets: BucketTable,
    pub allocator: Allocator,
    pub report: RecoveryReport,
}

/// Rebuild the table of a file that was not closed cleanly.
///
/// `header` is updated in place and written back, clean, before returning.
pub fn recover(file: &mut DataFile, header: &mut FileHeader, policy: FitPolicy) -> Result<Recovered> {
    let data_start = header.data_start();
    let physical = file.len()?;
    if physical < data_start {
        return Err(HashKvError::corrupt(format!(
            "file of {} bytes ends inside the bucket array ({} bytes)",
            physical, data_start
        )));
    }

    let (slots, end) = walk_slots(file, data_start, physical, header.file_size)?;
    let region = Region::new(data_start, end);

    let buckets = BucketTable::load(file, header.bucket_count, region)?;
    let live = walk_chains(file, &buckets, &slots, region)?;

    let mut orphaned_slots = 0;
    let mut free: Vec<FreeSlot> = Vec::new();
    for (slot, tag) in slots {
        if live.contains(&slot.offset) {
            continue;
        }
        if tag == SlotTag::Live {
            orphaned_slots += 1;
        }
        free.push(slot);
    }

    let mut high_water = end;
    while let Some(last) = free.last() {
        if last.offset + last.slot_size() != high_water {
            break;
        }
        high_water = last.offset;
        free.pop();
    }
    if high_water < physical {
        file.set_len(high_water)?;
    }

    let report = RecoveryReport {
        live_records: live.len() as u64,
        orphaned_slots,
        free_slots: free.len() as u64,
        truncated_bytes: physical - high_water,
    };

    let allocator = Allocator::rebuild(file, free, policy, high_water)?;

    header.record_count = report.live_records;
    header.file_size = high_water;
    header.free_head = allocator.head();
    header.flags &= !FLAG_DIRTY;
    file.write_at(0, &header.encode()?)?;
    file.sync_all()?;

    Ok(Recovered {
        buckets,
        allocator,
        report,
    })
}

/// Every whole slot from `data_start` in file order, plus where the walk
/// stopped. A broken slot before `committed` is corruption, not a torn tail.
fn walk_slots(
    file: &mut DataFile,
    data_start: u64,
    physical: u64,
    committed: u64,
) -> Result<(Vec<(FreeSlot, SlotTag)>, u64)> {
    let region = Region::new(data_start, physical);
    let mut slots = Vec::new();
    let mut offset = data_start;

    while offset < physical {
        match read_any_slot_header(file, offset, region) {
            Ok(header) => {
                slots.push((
                    FreeSlot {
                        offset,
                        capacity: header.capacity,
                    },
                    header.tag,
                ));
                offset += header.slot_size();
            }
            Err(HashKvError::Corrupt(reason)) if offset >= committed => {
                tracing::warn!(offset, reason = %reason, "Discarding torn slot at end of file");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok((slots, offset))
}

/// Offsets of every slot reachable from the bucket array
fn walk_chains(
    file: &mut DataFile,
    buckets: &BucketTable,
    slots: &[(FreeSlot, SlotTag)],
    region: Region,
) -> Result<HashSet<u64>> {
    let starts: HashSet<u64> = slots.iter().map(|(slot, _)| slot.offset).collect();
    let mut live = HashSet::new();

    for bucket in 0..buckets.len() {
        let mut offset = buckets.head(bucket);
        while offset != 0 {
            if !starts.contains(&offset) {
                return Err(HashKvError::corrupt(format!(
                    "chain of bucket {} points at {}, which is not a slot boundary",
                    bucket, offset
                )));
            }
            if !live.insert(offset) {
                return Err(HashKvError::corrupt(format!(
                    "slot at {} reached twice from bucket {}",
                    offset, bucket
                )));
            }

            let header = read_slot_header(file, offset, region, SlotTag::Live)?;
            let key = file.read_vec(offset + SLOT_HEADER_SIZE, header.key_len as u64)?;
            if buckets.bucket_for(&key) != bucket {
                return Err(HashKvError::corrupt(format!(
                    "record at {} chained in bucket {} but hashes elsewhere",
                    offset, bucket
                )));
            }
            offset = header.next;
        }
    }

    Ok(live)
}
