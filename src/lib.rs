//! # HashKV
//!
//! A durable, single-file, hash-organized key-value store with:
//! - Chained hash buckets with byte-exact key comparison
//! - Free-space reuse (first-fit or best-fit, with slot splitting)
//! - CRC32-checked header and records
//! - Cursors, lazy iterators and a background channel scan
//! - Per-handle error state with stable error codes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Database (handle)                         │
//! │          Mutex<Engine> + ErrorState, closable                │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │ Weak
//!                ▼                              ▼
//!        ┌──────────────┐               ┌──────────────┐
//!        │    Engine    │◀──────────────│    Cursor    │
//!        │ (get/set/..) │   positions   │ Iter / Scan  │
//!        └──────┬───────┘               └──────────────┘
//!               │
//!     ┌─────────┼──────────────┐
//!     ▼         ▼              ▼
//! ┌────────┐ ┌──────────┐ ┌───────────┐
//! │ Codec  │ │ Buckets  │ │ Allocator │
//! └────┬───┘ └────┬─────┘ └─────┬─────┘
//!      └──────────┼─────────────┘
//!                 ▼
//!          ┌─────────────┐
//!          │  DataFile   │
//!          │ (one file)  │
//!          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod storage;
pub mod table;
pub mod engine;
pub mod db;
pub mod cursor;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorCode, ErrorState, HashKvError, Result};
pub use config::{Config, FitPolicy, SyncStrategy};
pub use engine::{Engine, IntegrityReport, Stats};
pub use db::Database;
pub use cursor::{Cursor, CursorState, Iter, Keys, Scan};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of HashKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
