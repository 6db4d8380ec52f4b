//! Codec Module
//!
//! Byte-level layout of the database file.
//!
//! ## Responsibilities
//! - Bucket placement hash (stable across processes)
//! - File header encoding with CRC32 validation
//! - Record slot encoding with CRC32 over lengths, key and value
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (64 bytes)                                            │
//! │   Magic "HKVD" (4) | Version (2) | Flags (2)                 │
//! │   BucketCount (8) | RecordCount (8) | FileSize (8)           │
//! │   FreeHead (8) | CRC32 (4) | Padding (20)                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Bucket Array (8 * BucketCount)                               │
//! │   [ChainHead: u64] ... (0 = empty bucket)                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Data Region (variable)                                       │
//! │   ┌──────────────────────────────┬────────────────────────┐  │
//! │   │ Slot Header (40)             │ Payload (Capacity)     │  │
//! │   │ Tag | KeyLen | Capacity |    │ Key | Value | slack    │  │
//! │   │ Next | ValueLen | CRC        │                        │  │
//! │   └──────────────────────────────┴────────────────────────┘  │
//! │   ... live slots chain per bucket, free slots chain from     │
//! │       FreeHead ...                                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod hash;
mod header;
mod record;

pub use hash::{bucket_index, fnv1a64};
pub use header::{FileHeader, BUCKET_ENTRY_SIZE, FLAG_DIRTY, HEADER_SIZE, MAGIC, VERSION};
pub use record::{
    check_key, encode_record, payload_size, record_crc, SlotHeader, SlotTag, NEXT_FIELD_OFFSET,
    SLOT_HEADER_SIZE,
};
