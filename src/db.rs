//! Database handle
//!
//! The public, closable handle over an `Engine`.
//!
//! ## Concurrency Model
//! One `parking_lot::Mutex` guards the engine and the error state, so every
//! call is serialized and the handle is `Send + Sync`. Cursors hold only a
//! `Weak` reference: they never keep a dropped handle alive and fail with
//! `Closed` once the handle is closed or gone.
//!
//! ## Error State
//! Each call overwrites the handle's `ErrorState`: success resets it, failure
//! stores the code and message. The state lives in the handle, never in a
//! global, so handles in one process do not interfere.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::cursor::{Cursor, Iter, Keys, Scan};
use crate::engine::{Engine, IntegrityReport, Stats};
use crate::error::{ErrorState, HashKvError, Result};

/// State shared between a handle and its cursors
#[derive(Debug)]
pub(crate) struct Inner {
    /// None once closed
    engine: Option<Engine>,
    last_error: ErrorState,
    path: PathBuf,
}

impl Inner {
    /// Run `f` against the open engine and record the outcome
    pub(crate) fn run<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Engine) -> Result<T>,
    ) -> Result<T> {
        let result = match self.engine.as_mut() {
            Some(engine) => f(engine),
            None => Err(HashKvError::Closed),
        };
        self.record(op, &result);
        result
    }

    pub(crate) fn record<T>(&mut self, op: &'static str, result: &Result<T>) {
        match result {
            Ok(_) => self.last_error = ErrorState::success(),
            Err(e) => {
                tracing::debug!(op, error = %e, path = %self.path.display(), "Operation failed");
                self.last_error = ErrorState::from_error(e);
            }
        }
    }
}

/// Handle to an open database file
///
/// ```no_run
/// use hashkv::Database;
///
/// let db = Database::open_path("/tmp/example.hkv")?;
/// db.set(b"ABC", b"124")?;
/// assert_eq!(db.get(b"ABC")?, b"124");
/// db.close()?;
/// # Ok::<(), hashkv::HashKvError>(())
/// ```
#[derive(Debug)]
pub struct Database {
    inner: Arc<Mutex<Inner>>,
}

impl Database {
    /// Open or create a database with the given config
    pub fn open(config: Config) -> Result<Self> {
        let path = config.path.clone();
        let engine = Engine::open(config)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                engine: Some(engine),
                last_error: ErrorState::success(),
                path,
            })),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified file
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::builder().path(path.as_ref()).build())
    }

    /// Flush and release the file. Every later call fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let result = match inner.engine.take() {
            Some(engine) => engine.close(),
            None => Err(HashKvError::Closed),
        };
        inner.record("close", &result);
        result
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Get a value; `NotFound` when the key is absent
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.run("get", |engine| engine.get(key)?.ok_or(HashKvError::NotFound))
    }

    /// Get a value, substituting `default` only when the key is absent.
    /// Every other failure propagates unchanged.
    pub fn get_or_default(&self, key: &[u8], default: &[u8]) -> Result<Vec<u8>> {
        self.run("get_or_default", |engine| {
            Ok(engine.get(key)?.unwrap_or_else(|| default.to_vec()))
        })
    }

    /// Insert or overwrite a record
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.run("set", |engine| engine.set(key, value))
    }

    /// Store only if absent; returns whether it was stored
    pub fn add(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.run("add", |engine| engine.add(key, value))
    }

    /// Store only if present; returns whether it was stored
    pub fn replace(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.run("replace", |engine| engine.replace(key, value))
    }

    /// Concatenate onto the existing value, or insert
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.run("append", |engine| engine.append(key, value))
    }

    /// Remove a record; false when the key was absent
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.run("remove", |engine| engine.remove(key))
    }

    /// Read and remove a record under one lock acquisition
    pub fn pop(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.run("pop", |engine| engine.pop(key)?.ok_or(HashKvError::NotFound))
    }

    /// Check presence without copying the value
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.run("contains", |engine| engine.contains(key))
    }

    /// Number of live records
    pub fn count(&self) -> Result<u64> {
        self.run("count", |engine| Ok(engine.count()))
    }

    /// Remove every record
    pub fn clear(&self) -> Result<()> {
        self.run("clear", |engine| engine.clear())
    }

    /// Force the header and data to disk
    pub fn sync(&self) -> Result<()> {
        self.run("sync", |engine| engine.sync())
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// A cursor in the `Created` state
    pub fn cursor(&self) -> Cursor {
        Cursor::new(Arc::downgrade(&self.inner))
    }

    /// Lazy scan of all key/value pairs in bucket order
    pub fn iter(&self) -> Iter {
        Iter::new(self.cursor())
    }

    /// Lazy scan of all keys in bucket order
    pub fn keys(&self) -> Keys {
        Keys::new(self.cursor())
    }

    /// Scan on a background thread feeding a bounded channel
    pub fn scan_channel(&self, capacity: usize) -> Result<Scan> {
        let result = Scan::spawn(self.cursor(), capacity);
        self.inner.lock().record("scan", &result);
        result
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn stats(&self) -> Result<Stats> {
        self.run("stats", |engine| Ok(engine.stats()))
    }

    /// Full structural check of chains, free list and space accounting
    pub fn verify(&self) -> Result<IntegrityReport> {
        self.run("verify", |engine| engine.verify())
    }

    /// Outcome of the most recent call
    pub fn last_error(&self) -> ErrorState {
        self.inner.lock().last_error.clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().engine.is_some()
    }

    /// Path the handle was opened with
    pub fn path(&self) -> PathBuf {
        self.inner.lock().path.clone()
    }

    fn run<T>(&self, op: &'static str, f: impl FnOnce(&mut Engine) -> Result<T>) -> Result<T> {
        self.inner.lock().run(op, f)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Some(engine) = inner.engine.take() {
            tracing::warn!(path = %inner.path.display(), "Database dropped without close");
            if let Err(e) = engine.close() {
                tracing::error!(path = %inner.path.display(), error = %e, "Failed to close database on drop");
            }
        }
    }
}
