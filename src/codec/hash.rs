//! Bucket placement hash
//!
//! FNV-1a (64-bit). Placement is never persisted, so the hash only has to
//! be deterministic: every open rehashes keys identically.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a hash of a byte sequence
#[inline]
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Bucket a key belongs to
#[inline]
pub fn bucket_index(key: &[u8], bucket_count: u64) -> usize {
    (fnv1a64(key) % bucket_count) as usize
}
