//! Tests for record slot encoding
//!
//! These tests verify:
//! - Slot header layout and decoding
//! - Record encoding (header + key + value, no slack)
//! - CRC detection of damaged keys and values
//! - Rejection of invalid tags, oversized payloads and overflowing lengths
//! - Stability of the bucket placement hash

use hashkv::codec::{
    bucket_index, encode_record, fnv1a64, payload_size, record_crc, SlotHeader, SlotTag,
    SLOT_HEADER_SIZE,
};
use hashkv::{ErrorCode, HashKvError};

// =============================================================================
// Slot Header Tests
// =============================================================================

#[test]
fn test_live_header_decodes_back() {
    let header = SlotHeader::live(b"key", b"value", 16, 4096);
    let bytes = header.encode();

    let decoded = SlotHeader::decode(&bytes, 0).unwrap();

    assert_eq!(decoded, header);
    assert_eq!(decoded.tag, SlotTag::Live);
    assert_eq!(decoded.key_len, 3);
    assert_eq!(decoded.value_len, 5);
    assert_eq!(decoded.next, 4096);
    assert_eq!(decoded.payload_len(), 8);
    assert_eq!(decoded.slot_size(), SLOT_HEADER_SIZE + 16);
}

#[test]
fn test_free_header_has_no_payload() {
    let header = SlotHeader::free(64, 123);
    let decoded = SlotHeader::decode(&header.encode(), 0).unwrap();

    assert_eq!(decoded.tag, SlotTag::Free);
    assert_eq!(decoded.capacity, 64);
    assert_eq!(decoded.next, 123);
    assert_eq!(decoded.payload_len(), 0);
}

#[test]
fn test_decode_rejects_unknown_tag() {
    let mut bytes = SlotHeader::free(8, 0).encode();
    bytes[0] = b'X';

    let err = SlotHeader::decode(&bytes, 77).unwrap_err();

    assert!(matches!(err, HashKvError::Corrupt(_)));
    assert_eq!(err.code(), ErrorCode::Corrupt);
}

#[test]
fn test_decode_rejects_truncated_header() {
    let bytes = SlotHeader::free(8, 0).encode();

    let err = SlotHeader::decode(&bytes[..20], 0).unwrap_err();

    assert!(matches!(err, HashKvError::Corrupt(_)));
}

#[test]
fn test_decode_rejects_payload_larger_than_capacity() {
    // A live header claiming 100 value bytes in an 8-byte slot
    let header = SlotHeader {
        tag: SlotTag::Live,
        key_len: 1,
        capacity: 8,
        next: 0,
        value_len: 100,
        crc: 0,
    };

    let err = SlotHeader::decode(&header.encode(), 0).unwrap_err();

    assert!(matches!(err, HashKvError::Corrupt(_)));
}

#[test]
fn test_decode_rejects_overflowing_lengths() {
    let overflowing_value = SlotHeader {
        tag: SlotTag::Live,
        key_len: 1,
        capacity: 8,
        next: 0,
        value_len: u64::MAX,
        crc: 0,
    };
    let overflowing_capacity = SlotHeader {
        capacity: u64::MAX,
        value_len: 1,
        ..overflowing_value
    };

    for header in [overflowing_value, overflowing_capacity] {
        let err = SlotHeader::decode(&header.encode(), 72).unwrap_err();
        assert!(matches!(err, HashKvError::Corrupt(_)));
    }
}

// =============================================================================
// Record Encoding Tests
// =============================================================================

#[test]
fn test_encode_record_layout() {
    let bytes = encode_record(b"ABC", b"124", 8, 0).unwrap();

    // Slack is not written
    assert_eq!(bytes.len(), SLOT_HEADER_SIZE as usize + 6);
    assert_eq!(&bytes[SLOT_HEADER_SIZE as usize..], b"ABC124");

    let header = SlotHeader::decode(&bytes, 0).unwrap();
    assert_eq!(header.capacity, 8);
    assert_eq!(header.crc, record_crc(b"ABC", b"124"));
}

#[test]
fn test_encode_record_binary_data() {
    let key = [0u8, 255, 0, 10];
    let value = [0xde, 0xad, 0x00, 0xbe, 0xef];

    let bytes = encode_record(&key, &value, 16, 0).unwrap();
    let header = SlotHeader::decode(&bytes, 0).unwrap();
    let payload = &bytes[SLOT_HEADER_SIZE as usize..];

    let (stored_key, stored_value) = payload.split_at(header.key_len as usize);
    assert_eq!(stored_key, key);
    assert_eq!(stored_value, value);
    header.verify(stored_key, stored_value, 0).unwrap();
}

#[test]
fn test_encode_record_rejects_small_capacity() {
    let err = encode_record(b"key", b"value", 4, 0).unwrap_err();
    assert!(matches!(err, HashKvError::Corrupt(_)));
}

#[test]
fn test_verify_detects_damaged_value() {
    let header = SlotHeader::live(b"key", b"value", 8, 0);

    let err = header.verify(b"key", b"valuX", 40).unwrap_err();

    assert!(matches!(err, HashKvError::Corrupt(_)));
}

#[test]
fn test_crc_covers_split_point() {
    // Same concatenated bytes, different key/value boundary
    assert_ne!(record_crc(b"ab", b"c"), record_crc(b"a", b"bc"));
}

#[test]
fn test_payload_size() {
    assert_eq!(payload_size(b"", b""), 0);
    assert_eq!(payload_size(b"key", b"value"), 8);
}

// =============================================================================
// Hash Tests
// =============================================================================

#[test]
fn test_hash_is_deterministic() {
    assert_eq!(fnv1a64(b"ABC"), fnv1a64(b"ABC"));
    assert_ne!(fnv1a64(b"ABC"), fnv1a64(b"ABD"));
}

#[test]
fn test_bucket_index_spreads_keys() {
    let mut used = std::collections::HashSet::new();
    for i in 0..1000 {
        used.insert(bucket_index(format!("key{}", i).as_bytes(), 64));
    }
    assert!(used.len() > 56, "only {} buckets used", used.len());
}
