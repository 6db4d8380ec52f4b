//! Data file
//!
//! Positional reads and writes on the single backing file, plus the
//! advisory lock that keeps a second handle from opening it.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{HashKvError, Result};

/// The open backing file
#[derive(Debug)]
pub struct DataFile {
    file: File,
    path: PathBuf,
    locked: bool,
}

impl DataFile {
    /// Open the file read-write, optionally creating it and taking an
    /// exclusive advisory lock. A held lock fails fast with `Locked`.
    pub fn open(path: &Path, create: bool, lock: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;

        if lock {
            match file.try_lock_exclusive() {
                Ok(()) => {}
                Err(e) if is_lock_contended(&e) => {
                    tracing::error!(path = %path.display(), "Database file is already locked");
                    return Err(HashKvError::Locked(path.to_path_buf()));
                }
                Err(e) => return Err(HashKvError::Io(e)),
            }
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            locked: lock,
        })
    }

    /// Read exactly `buf.len()` bytes at `offset`
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Read `len` bytes at `offset` into a new buffer
    pub fn read_vec(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| {
            HashKvError::corrupt(format!("read of {} bytes at {} too large", len, offset))
        })?;
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Write all of `data` at `offset`
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Write a little-endian u64 at `offset`
    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Physical file length
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncate or zero-extend the file
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    /// Flush file contents to stable storage
    pub fn sync_data(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Flush contents and metadata to stable storage
    pub fn sync_all(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Release the advisory lock (also released when the file is dropped)
    pub fn unlock(&mut self) -> Result<()> {
        if self.locked {
            FileExt::unlock(&self.file)?;
            self.locked = false;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Contention shows up as WouldBlock or as the platform's raw lock error.
fn is_lock_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
