//! Tests for the free space allocator
//!
//! These tests verify:
//! - Extending the file when no free slot fits
//! - Reuse and splitting of released slots
//! - First-fit vs best-fit selection
//! - The on-disk free list matches the in-memory one after reload
//! - Rebuilding a free list from a known set of slots

use hashkv::table::{Allocation, Allocator, FreeSlot, Region};
use hashkv::storage::DataFile;
use hashkv::FitPolicy;
use tempfile::TempDir;

/// Stand-in for the end of the bucket array
const BASE: u64 = 64;

// =============================================================================
// Allocation Tests
// =============================================================================

#[test]
fn test_allocate_extends_file_when_list_empty() {
    let (_dir, mut file) = open_file();
    let mut allocator = Allocator::new(FitPolicy::FirstFit, BASE);

    let first = allocator.allocate(&mut file, 5).unwrap();
    let second = allocator.allocate(&mut file, 0).unwrap();

    // Capacities are aligned and never zero
    assert_eq!(
        first,
        Allocation {
            offset: BASE,
            capacity: 8,
            extended: true
        }
    );
    assert_eq!(
        second,
        Allocation {
            offset: BASE + 48,
            capacity: 8,
            extended: true
        }
    );
    assert_eq!(allocator.high_water(), BASE + 96);
    assert_eq!(allocator.free_slots(), 0);
}

#[test]
fn test_release_then_reuse_whole_slot() {
    let (_dir, mut file) = open_file();
    let mut allocator = Allocator::new(FitPolicy::FirstFit, BASE);

    let slot = allocator.allocate(&mut file, 24).unwrap();
    allocator.release(&mut file, slot.offset, slot.capacity).unwrap();
    assert_eq!(allocator.head(), slot.offset);
    assert_eq!(allocator.free_bytes(), 64);

    // Too small a remainder to split: the whole slot comes back
    let reused = allocator.allocate(&mut file, 20).unwrap();
    assert_eq!(
        reused,
        Allocation {
            offset: slot.offset,
            capacity: 24,
            extended: false
        }
    );
    assert_eq!(allocator.head(), 0);
    assert_eq!(allocator.free_bytes(), 0);
    assert_eq!(allocator.high_water(), BASE + 64);
}

#[test]
fn test_large_slot_is_split() {
    let (_dir, mut file) = open_file();
    let mut allocator = Allocator::new(FitPolicy::FirstFit, BASE);

    let slot = allocator.allocate(&mut file, 200).unwrap();
    assert_eq!(allocator.high_water(), BASE + 240);
    allocator.release(&mut file, slot.offset, slot.capacity).unwrap();

    let small = allocator.allocate(&mut file, 20).unwrap();
    assert_eq!(
        small,
        Allocation {
            offset: BASE,
            capacity: 24,
            extended: false
        }
    );

    let rest: Vec<FreeSlot> = allocator.iter().copied().collect();
    assert_eq!(
        rest,
        vec![FreeSlot {
            offset: BASE + 64,
            capacity: 136
        }]
    );
    assert_eq!(allocator.free_bytes(), 176);

    // The remainder was written to disk as the new list head
    let reloaded = Allocator::load(
        &mut file,
        allocator.head(),
        Region::new(BASE, allocator.high_water()),
        FitPolicy::FirstFit,
    )
    .unwrap();
    assert_eq!(reloaded.iter().copied().collect::<Vec<_>>(), rest);
    assert_eq!(reloaded.free_bytes(), 176);
}

// =============================================================================
// Fit Policy Tests
// =============================================================================

#[test]
fn test_first_fit_takes_first_large_enough_slot() {
    let (_dir, mut file) = open_file();
    let mut allocator = Allocator::new(FitPolicy::FirstFit, BASE);
    let [s1, s2, s3] = release_three(&mut file, &mut allocator);

    // List order is s3, s2, s1
    assert_eq!(
        allocator.iter().map(|slot| slot.offset).collect::<Vec<_>>(),
        vec![s3.offset, s2.offset, s1.offset]
    );

    let got = allocator.allocate(&mut file, 32).unwrap();
    assert_eq!(got.offset, s3.offset);
    assert_eq!(got.capacity, 64);
    assert_eq!(allocator.head(), s2.offset);
}

#[test]
fn test_best_fit_takes_smallest_large_enough_slot() {
    let (_dir, mut file) = open_file();
    let mut allocator = Allocator::new(FitPolicy::BestFit, BASE);
    let [s1, s2, s3] = release_three(&mut file, &mut allocator);

    let got = allocator.allocate(&mut file, 32).unwrap();
    assert_eq!(got.offset, s2.offset);
    assert_eq!(got.capacity, 40);
    assert!(!got.extended);

    // s3 must now link past s2 on disk
    let reloaded = Allocator::load(
        &mut file,
        allocator.head(),
        Region::new(BASE, allocator.high_water()),
        FitPolicy::BestFit,
    )
    .unwrap();
    assert_eq!(
        reloaded.iter().copied().collect::<Vec<_>>(),
        vec![
            FreeSlot {
                offset: s3.offset,
                capacity: 64
            },
            FreeSlot {
                offset: s1.offset,
                capacity: 104
            },
        ]
    );
}

#[test]
fn test_no_fit_extends_file() {
    let (_dir, mut file) = open_file();
    let mut allocator = Allocator::new(FitPolicy::BestFit, BASE);
    release_three(&mut file, &mut allocator);
    let end = allocator.high_water();

    let got = allocator.allocate(&mut file, 500).unwrap();

    assert_eq!(got.offset, end);
    assert!(got.extended);
    assert_eq!(allocator.free_slots(), 3);
}

// =============================================================================
// Reload Tests
// =============================================================================

#[test]
fn test_load_rejects_dangling_head() {
    let (_dir, mut file) = open_file();
    let mut allocator = Allocator::new(FitPolicy::FirstFit, BASE);
    let slot = allocator.allocate(&mut file, 8).unwrap();
    allocator.release(&mut file, slot.offset, slot.capacity).unwrap();

    let result = Allocator::load(
        &mut file,
        allocator.high_water() + 8,
        Region::new(BASE, allocator.high_water()),
        FitPolicy::FirstFit,
    );

    assert!(matches!(result, Err(hashkv::HashKvError::Corrupt(_))));
}

#[test]
fn test_rebuild_links_slots_in_given_order() {
    let (_dir, mut file) = open_file();
    let mut allocator = Allocator::new(FitPolicy::FirstFit, BASE);
    let [s1, _, s3] = release_three(&mut file, &mut allocator);
    let high_water = allocator.high_water();

    let slots: Vec<FreeSlot> = [s1, s3]
        .iter()
        .map(|slot| FreeSlot {
            offset: slot.offset,
            capacity: slot.capacity,
        })
        .collect();
    let rebuilt = Allocator::rebuild(&mut file, slots, FitPolicy::BestFit, high_water).unwrap();

    assert_eq!(rebuilt.head(), s1.offset);
    assert_eq!(rebuilt.free_slots(), 2);
    assert_eq!(rebuilt.free_bytes(), 40 + s1.capacity + 40 + s3.capacity);
    assert_eq!(rebuilt.high_water(), high_water);

    // The on-disk links agree with the rebuilt list
    let reloaded = Allocator::load(
        &mut file,
        rebuilt.head(),
        Region::new(BASE, high_water),
        FitPolicy::FirstFit,
    )
    .unwrap();
    assert_eq!(reloaded.free_slots(), 2);
    assert_eq!(reloaded.free_bytes(), rebuilt.free_bytes());
}

#[test]
fn test_reset_forgets_free_slots() {
    let (_dir, mut file) = open_file();
    let mut allocator = Allocator::new(FitPolicy::FirstFit, BASE);
    release_three(&mut file, &mut allocator);

    allocator.reset(BASE);

    assert_eq!(allocator.free_slots(), 0);
    assert_eq!(allocator.free_bytes(), 0);
    assert_eq!(allocator.head(), 0);
    assert_eq!(allocator.allocate(&mut file, 8).unwrap().offset, BASE);
}

// =============================================================================
// Helper Functions
// =============================================================================

fn open_file() -> (TempDir, DataFile) {
    let dir = TempDir::new().unwrap();
    let file = DataFile::open(&dir.path().join("alloc.db"), true, false).unwrap();
    (dir, file)
}

/// Allocate slots of 104, 40 and 64 bytes, then release all three in order
fn release_three(file: &mut DataFile, allocator: &mut Allocator) -> [Allocation; 3] {
    let s1 = allocator.allocate(file, 104).unwrap();
    let s2 = allocator.allocate(file, 40).unwrap();
    let s3 = allocator.allocate(file, 64).unwrap();
    for slot in [s1, s2, s3] {
        allocator.release(file, slot.offset, slot.capacity).unwrap();
    }
    [s1, s2, s3]
}
