//! Tests for cursors, lazy iterators and the background scan
//!
//! These tests verify:
//! - Full-scan completeness (each record exactly once)
//! - The jump_to_start / advance / current protocol and its states
//! - Invalidation by mutation and resync via jump_to_start
//! - Closed and dropped handles
//! - Early abandonment of a channel scan
//! - Mid-scan failures surfaced to the consumer

use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use hashkv::{Config, CursorState, Database, ErrorCode, HashKvError};
use tempfile::TempDir;

// =============================================================================
// Completeness Tests
// =============================================================================

#[test]
fn test_full_scan_yields_each_record_once() {
    let (_dir, db) = open_temp(64);
    let expected = seed_sample(&db);

    let mut cursor = db.cursor();
    let mut seen = BTreeMap::new();
    let mut more = cursor.jump_to_start().unwrap();
    while more {
        let key = cursor.current_key().unwrap();
        let value = cursor.current_value().unwrap();
        assert!(seen.insert(key, value).is_none(), "record visited twice");
        more = cursor.advance().unwrap();
    }

    assert_eq!(seen, expected);
    assert_eq!(cursor.state(), CursorState::Exhausted);
}

#[test]
fn test_scan_independent_of_insertion_order() {
    let (_dir, forward) = open_temp(64);
    let (_dir2, backward) = open_temp(64);
    let pairs = sample_pairs();

    for (key, value) in pairs.iter() {
        forward.set(key, value).unwrap();
    }
    for (key, value) in pairs.iter().rev() {
        backward.set(key, value).unwrap();
    }

    let a: BTreeMap<_, _> = forward.iter().map(|item| item.unwrap()).collect();
    let b: BTreeMap<_, _> = backward.iter().map(|item| item.unwrap()).collect();
    assert_eq!(a, b);
    assert_eq!(a.len(), 4);
}

#[test]
fn test_iter_and_keys() {
    let (_dir, db) = open_temp(64);
    let expected = seed_sample(&db);

    let records: BTreeMap<_, _> = db.iter().collect::<Result<_, _>>().unwrap();
    assert_eq!(records, expected);

    let keys: HashSet<Vec<u8>> = db.keys().collect::<Result<_, _>>().unwrap();
    let expected_keys: HashSet<Vec<u8>> = expected.keys().cloned().collect();
    assert_eq!(keys, expected_keys);
}

#[test]
fn test_large_scan_matches_count() {
    let (_dir, db) = open_temp(128);
    for i in 0..1000 {
        db.set(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
            .unwrap();
    }
    for i in (0..1000).step_by(7) {
        db.remove(format!("key{}", i).as_bytes()).unwrap();
    }

    let keys: Vec<Vec<u8>> = db.keys().collect::<Result<_, _>>().unwrap();
    let unique: HashSet<_> = keys.iter().cloned().collect();

    assert_eq!(keys.len() as u64, db.count().unwrap());
    assert_eq!(unique.len(), keys.len());
}

#[test]
fn test_chain_order_within_bucket() {
    let (_dir, db) = open_temp(1);
    db.set(b"a", b"1").unwrap();
    db.set(b"b", b"2").unwrap();
    db.set(b"c", b"3").unwrap();

    assert_eq!(collect_keys(&db), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    // New records join the tail even when they reuse an earlier slot
    db.remove(b"b").unwrap();
    db.set(b"d", b"4").unwrap();
    assert_eq!(collect_keys(&db), vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]);
}

// =============================================================================
// Protocol Tests
// =============================================================================

#[test]
fn test_empty_database() {
    let (_dir, db) = open_temp(64);
    let mut cursor = db.cursor();

    assert!(!cursor.jump_to_start().unwrap());
    assert_eq!(cursor.state(), CursorState::Exhausted);
    assert!(matches!(cursor.current_key(), Err(HashKvError::Exhausted)));
    assert!(db.iter().next().is_none());
}

#[test]
fn test_created_cursor_has_no_current_record() {
    let (_dir, db) = open_temp(64);
    db.set(b"k", b"v").unwrap();
    let mut cursor = db.cursor();

    assert_eq!(cursor.state(), CursorState::Created);
    assert!(matches!(cursor.current_value(), Err(HashKvError::Exhausted)));
    assert_eq!(db.last_error().code, ErrorCode::Exhausted);

    // Advancing a fresh cursor starts the pass
    assert!(cursor.advance().unwrap());
    assert_eq!(cursor.current().unwrap(), (b"k".to_vec(), b"v".to_vec()));
    assert!(db.last_error().is_success());
}

#[test]
fn test_exhausted_cursor_stays_exhausted() {
    let (_dir, db) = open_temp(64);
    db.set(b"k", b"v").unwrap();
    let mut cursor = db.cursor();

    assert!(cursor.jump_to_start().unwrap());
    assert!(!cursor.advance().unwrap());
    assert!(!cursor.advance().unwrap());
    assert!(matches!(cursor.current_key(), Err(HashKvError::Exhausted)));

    // A new pass can start from the top
    assert!(cursor.jump_to_start().unwrap());
    assert_eq!(cursor.current_key().unwrap(), b"k");
}

#[test]
fn test_closed_cursor() {
    let (_dir, db) = open_temp(64);
    db.set(b"k", b"v").unwrap();
    let mut cursor = db.cursor();
    cursor.jump_to_start().unwrap();

    cursor.close();

    assert_eq!(cursor.state(), CursorState::Closed);
    assert!(matches!(cursor.advance(), Err(HashKvError::Closed)));
    assert!(matches!(cursor.jump_to_start(), Err(HashKvError::Closed)));
}

// =============================================================================
// Mutation Tests
// =============================================================================

#[test]
fn test_mutation_invalidates_cursor() {
    let (_dir, db) = open_temp(64);
    seed_sample(&db);
    let mut cursor = db.cursor();
    assert!(cursor.jump_to_start().unwrap());

    db.set(b"new", b"record").unwrap();

    assert!(matches!(cursor.advance(), Err(HashKvError::CursorInvalidated)));
    assert!(matches!(
        cursor.current_key(),
        Err(HashKvError::CursorInvalidated)
    ));
    assert_eq!(db.last_error().code, ErrorCode::Invalidated);

    // jump_to_start resyncs with the new table
    assert!(cursor.jump_to_start().unwrap());
    let mut visited = 1;
    while cursor.advance().unwrap() {
        visited += 1;
    }
    assert_eq!(visited, 5);
}

#[test]
fn test_reads_do_not_invalidate_cursor() {
    let (_dir, db) = open_temp(64);
    seed_sample(&db);
    let mut cursor = db.cursor();
    cursor.jump_to_start().unwrap();

    db.get(b"ABC").unwrap();
    db.contains(b"missing").unwrap();
    assert!(!db.remove(b"missing").unwrap());
    db.count().unwrap();

    assert!(cursor.advance().unwrap());
}

#[test]
fn test_iter_surfaces_invalidation_once() {
    let (_dir, db) = open_temp(64);
    seed_sample(&db);

    let mut iter = db.iter();
    assert!(iter.next().unwrap().is_ok());
    db.remove(b"ABC").unwrap();

    assert!(matches!(
        iter.next(),
        Some(Err(HashKvError::CursorInvalidated))
    ));
    assert!(iter.next().is_none());
}

// =============================================================================
// Handle Lifetime Tests
// =============================================================================

#[test]
fn test_cursor_after_close_fails() {
    let (_dir, db) = open_temp(64);
    seed_sample(&db);
    let mut cursor = db.cursor();
    cursor.jump_to_start().unwrap();

    db.close().unwrap();

    assert!(matches!(cursor.advance(), Err(HashKvError::Closed)));
    assert_eq!(cursor.state(), CursorState::Closed);
}

#[test]
fn test_cursor_after_drop_fails() {
    let (_dir, db) = open_temp(64);
    seed_sample(&db);
    let mut cursor = db.cursor();
    let mut keys = db.keys();

    drop(db);

    assert!(matches!(cursor.jump_to_start(), Err(HashKvError::Closed)));
    assert!(matches!(keys.next(), Some(Err(HashKvError::Closed))));
    assert!(keys.next().is_none());
}

// =============================================================================
// Channel Scan Tests
// =============================================================================

#[test]
fn test_scan_channel_collects_everything() {
    let (_dir, db) = open_temp(64);
    for i in 0..500 {
        db.set(format!("key{}", i).as_bytes(), b"value").unwrap();
    }

    let records: Vec<_> = db
        .scan_channel(4)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    assert_eq!(records.len(), 500);
    let unique: HashSet<_> = records.iter().map(|(key, _)| key.clone()).collect();
    assert_eq!(unique.len(), 500);
}

#[test]
fn test_scan_channel_early_drop_releases_handle() {
    let (_dir, db) = open_temp(64);
    for i in 0..500 {
        db.set(format!("key{}", i).as_bytes(), b"value").unwrap();
    }

    let mut scan = db.scan_channel(2).unwrap();
    for _ in 0..5 {
        scan.next().unwrap().unwrap();
    }
    drop(scan);

    // Producer is gone and the handle is usable again
    db.set(b"after", b"scan").unwrap();
    assert_eq!(db.count().unwrap(), 501);
    db.close().unwrap();
}

#[test]
fn test_scan_channel_on_empty_database() {
    let (_dir, db) = open_temp(64);

    assert_eq!(db.scan_channel(1).unwrap().count(), 0);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_mid_scan_corruption_is_surfaced() {
    let (dir, db) = open_temp(64);
    db.set(b"k", b"value").unwrap();
    let data_start = db.stats().unwrap().data_start;
    db.close().unwrap();

    // First value byte: 40-byte slot header, then the 1-byte key
    flip_byte(&dir.path().join("test.db"), data_start + 41);
    let db = Database::open_path(dir.path().join("test.db")).unwrap();

    let mut iter = db.iter();
    assert!(matches!(iter.next(), Some(Err(HashKvError::Corrupt(_)))));
    assert!(iter.next().is_none());

    let mut scan = db.scan_channel(4).unwrap();
    assert!(matches!(scan.next(), Some(Err(HashKvError::Corrupt(_)))));
    assert!(scan.next().is_none());
}

// =============================================================================
// Helper Functions
// =============================================================================

fn open_temp(buckets: u64) -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .path(dir.path().join("test.db"))
        .bucket_count(buckets)
        .build();
    let db = Database::open(config).unwrap();
    (dir, db)
}

fn sample_pairs() -> Vec<(Vec<u8>, Vec<u8>)> {
    vec![
        (b"A".to_vec(), b"B".to_vec()),
        (b"z".to_vec(), b"y".to_vec()),
        (b"1".to_vec(), b"2".to_vec()),
        (b"ABC".to_vec(), b"124".to_vec()),
    ]
}

fn seed_sample(db: &Database) -> BTreeMap<Vec<u8>, Vec<u8>> {
    let pairs = sample_pairs();
    for (key, value) in &pairs {
        db.set(key, value).unwrap();
    }
    pairs.into_iter().collect()
}

fn collect_keys(db: &Database) -> Vec<Vec<u8>> {
    db.keys().collect::<Result<_, _>>().unwrap()
}

fn flip_byte(path: &std::path::Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xff;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
}
