//! Configuration for HashKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{HashKvError, Result};

/// Bucket count used when a new file is created
pub const DEFAULT_BUCKET_COUNT: u64 = 16_384;

/// Upper bound on buckets (the bucket array is kept in memory)
pub const MAX_BUCKET_COUNT: u64 = 1 << 28;

/// Main configuration for a HashKV database
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // File Configuration
    // -------------------------------------------------------------------------
    /// Path of the single backing file
    pub path: PathBuf,

    /// Create the file when it does not exist
    pub create_if_missing: bool,

    /// Hold an advisory exclusive lock while the handle is open
    pub lock_file: bool,

    // -------------------------------------------------------------------------
    // Table Configuration
    // -------------------------------------------------------------------------
    /// Number of hash buckets. Only used when creating a file; an
    /// existing file always keeps the count recorded in its header.
    pub bucket_count: u64,

    /// How freed slots are chosen for reuse
    pub fit_policy: FitPolicy,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// How often to fsync after mutations
    pub sync_strategy: SyncStrategy,
}

/// Sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every mutation (safest, slowest)
    EveryWrite,

    /// fsync after N mutations (balanced durability/performance)
    EveryNWrites { count: usize },

    /// fsync only on explicit `sync()` or `close()`
    OnClose,
}

/// Free slot selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitPolicy {
    /// First free slot large enough, in free-list order
    FirstFit,

    /// Smallest free slot large enough
    BestFit,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./hashkv.db"),
            create_if_missing: true,
            lock_file: true,
            bucket_count: DEFAULT_BUCKET_COUNT,
            fit_policy: FitPolicy::FirstFit,
            sync_strategy: SyncStrategy::EveryNWrites { count: 64 },
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.bucket_count == 0 || self.bucket_count > MAX_BUCKET_COUNT {
            return Err(HashKvError::Config(format!(
                "bucket_count must be in 1..={}, got {}",
                MAX_BUCKET_COUNT, self.bucket_count
            )));
        }
        if let SyncStrategy::EveryNWrites { count: 0 } = self.sync_strategy {
            return Err(HashKvError::Config(
                "EveryNWrites needs a count of at least 1".to_string(),
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(HashKvError::Config("path must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the backing file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the bucket count used on creation
    pub fn bucket_count(mut self, count: u64) -> Self {
        self.config.bucket_count = count;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the free slot selection policy
    pub fn fit_policy(mut self, policy: FitPolicy) -> Self {
        self.config.fit_policy = policy;
        self
    }

    /// Enable or disable the advisory file lock
    pub fn lock_file(mut self, lock: bool) -> Self {
        self.config.lock_file = lock;
        self
    }

    /// Enable or disable create-if-missing
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.config.create_if_missing = create;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
