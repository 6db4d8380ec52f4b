//! Engine Module
//!
//! The single-threaded storage core that coordinates all components.
//!
//! ## Responsibilities
//! - Open/create the backing file and validate its structure
//! - Point operations over codec + bucket table + allocator
//! - Keep the header (record count, high-water mark, free head) current
//! - Sync according to the configured strategy
//! - Expose chain positions for cursors
//!
//! ## Write Ordering
//! A record that moves is written in full to its new slot before the one
//! link pointing at the old slot is swapped, and only then is the old slot
//! released. The header is rewritten after every mutation.
//!
//! The first mutation after a clean state sets `FLAG_DIRTY` in the header
//! before touching any slot; `sync` and `close` clear it once the data is
//! on disk. A dirty file, or one whose length disagrees with the header,
//! is recovered on open from the chains themselves.

use std::path::Path;

use crate::codec::{
    check_key, encode_record, payload_size, FileHeader, SlotTag, FLAG_DIRTY, HEADER_SIZE,
    NEXT_FIELD_OFFSET, SLOT_HEADER_SIZE,
};
use crate::config::{Config, SyncStrategy};
use crate::error::{HashKvError, Result};
use crate::storage::DataFile;
use crate::table::{
    read_slot_header, recover, Allocator, BucketTable, Located, Lookup, Region,
};

/// Position of a live record: its bucket and slot offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub bucket: usize,
    pub offset: u64,
}

/// Cheap summary of the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub record_count: u64,
    pub bucket_count: u64,
    pub used_buckets: usize,
    pub file_size: u64,
    pub data_start: u64,
    pub free_slots: usize,
    pub free_bytes: u64,
}

/// Outcome of a full structural check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityReport {
    pub live_records: u64,
    /// Bytes of live slots, headers and slack included
    pub live_bytes: u64,
    pub free_slots: u64,
    pub free_bytes: u64,
    /// File header plus bucket array
    pub header_bytes: u64,
    pub file_size: u64,
    pub longest_chain: u64,
}

/// The storage engine
///
/// Every operation takes `&mut self`: the engine assumes a single owner.
/// `Database` adds the shared, closable handle on top.
#[derive(Debug)]
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// The backing file (exclusively locked unless disabled)
    file: DataFile,

    /// In-memory copy of the persisted header
    header: FileHeader,

    /// Chain heads, mirrored write-through
    buckets: BucketTable,

    /// Free slots and high-water mark
    allocator: Allocator,

    /// Bumped by every mutation; cursors use it to detect changes
    generation: u64,

    /// Mutations since the last fsync
    unsynced_writes: usize,
}

impl Engine {
    /// Open or create the database file described by `config`
    ///
    /// On startup:
    /// 1. Open/create and lock the file
    /// 2. Initialize an empty file, or read and validate the header
    /// 3. Recover if the file is dirty or its length disagrees with the header
    /// 4. Otherwise load the bucket array and the free list
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let mut file = DataFile::open(&config.path, config.create_if_missing, config.lock_file)?;

        let mut header = if file.is_empty()? {
            Self::initialize(&mut file, config.bucket_count)?
        } else {
            Self::read_header(&mut file)?
        };

        if header.bucket_count != config.bucket_count {
            tracing::debug!(
                file_buckets = header.bucket_count,
                configured_buckets = config.bucket_count,
                "Existing file keeps its own bucket count"
            );
        }

        let physical = file.len()?;
        let (buckets, allocator) = if header.is_dirty() || header.file_size != physical {
            tracing::warn!(
                path = %config.path.display(),
                dirty = header.is_dirty(),
                header_size = header.file_size,
                file_size = physical,
                "Database was not closed cleanly, recovering"
            );
            let recovered = recover(&mut file, &mut header, config.fit_policy)?;
            tracing::info!(
                live_records = recovered.report.live_records,
                orphaned_slots = recovered.report.orphaned_slots,
                free_slots = recovered.report.free_slots,
                truncated_bytes = recovered.report.truncated_bytes,
                "Recovery complete"
            );
            (recovered.buckets, recovered.allocator)
        } else {
            let region = Region::new(header.data_start(), header.file_size);
            let buckets = BucketTable::load(&mut file, header.bucket_count, region)?;
            let allocator = Allocator::load(&mut file, header.free_head, region, config.fit_policy)?;
            (buckets, allocator)
        };

        tracing::info!(
            path = %config.path.display(),
            buckets = header.bucket_count,
            records = header.record_count,
            file_size = header.file_size,
            free_slots = allocator.free_slots(),
            "Opened database"
        );

        Ok(Self {
            config,
            file,
            header,
            buckets,
            allocator,
            generation: 0,
            unsynced_writes: 0,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified file
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::builder().path(path.as_ref()).build())
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get a value by key
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.lookup(key)? {
            Lookup::Found(located) => Ok(Some(self.read_value(&located)?)),
            Lookup::Missing { .. } => Ok(None),
        }
    }

    /// Check presence without reading the value
    pub fn contains(&mut self, key: &[u8]) -> Result<bool> {
        Ok(matches!(self.lookup(key)?, Lookup::Found(_)))
    }

    /// Number of live records (O(1), from the header)
    pub fn count(&self) -> u64 {
        self.header.record_count
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Insert or overwrite a record
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        self.generation += 1;
        self.begin_write()?;

        match self.lookup(key)? {
            Lookup::Found(located) => self.overwrite(&located, key, value)?,
            Lookup::Missing { bucket, tail } => self.insert(bucket, tail, key, value)?,
        }

        self.commit()
    }

    /// Store only if the key is absent; returns whether it was stored
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        check_key(key)?;

        match self.lookup(key)? {
            Lookup::Found(_) => Ok(false),
            Lookup::Missing { bucket, tail } => {
                self.generation += 1;
                self.begin_write()?;
                self.insert(bucket, tail, key, value)?;
                self.commit()?;
                Ok(true)
            }
        }
    }

    /// Store only if the key is present; returns whether it was stored
    pub fn replace(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        match self.lookup(key)? {
            Lookup::Found(located) => {
                self.generation += 1;
                self.begin_write()?;
                self.overwrite(&located, key, value)?;
                self.commit()?;
                Ok(true)
            }
            Lookup::Missing { .. } => Ok(false),
        }
    }

    /// Concatenate `value` onto the existing value, or insert it
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        self.generation += 1;
        self.begin_write()?;

        match self.lookup(key)? {
            Lookup::Found(located) => {
                let mut combined = self.read_value(&located)?;
                combined.extend_from_slice(value);
                self.overwrite(&located, key, &combined)?;
            }
            Lookup::Missing { bucket, tail } => self.insert(bucket, tail, key, value)?,
        }

        self.commit()
    }

    /// Remove a record; false (not an error) when the key is absent
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        match self.lookup(key)? {
            Lookup::Found(located) => {
                self.generation += 1;
                self.begin_write()?;
                self.unlink(&located)?;
                self.commit()?;
                Ok(true)
            }
            Lookup::Missing { .. } => Ok(false),
        }
    }

    /// Read and remove a record in one step
    pub fn pop(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.lookup(key)? {
            Lookup::Found(located) => {
                let value = self.read_value(&located)?;
                self.generation += 1;
                self.begin_write()?;
                self.unlink(&located)?;
                self.commit()?;
                Ok(Some(value))
            }
            Lookup::Missing { .. } => Ok(None),
        }
    }

    /// Drop every record and shrink the file back to the bucket array
    pub fn clear(&mut self) -> Result<()> {
        self.generation += 1;
        self.begin_write()?;

        let data_start = self.header.data_start();
        self.buckets.reset(&mut self.file)?;
        self.allocator.reset(data_start);
        self.file.set_len(data_start)?;
        self.header.record_count = 0;
        self.commit()?;

        tracing::info!(path = %self.config.path.display(), "Cleared database");
        Ok(())
    }

    /// Persist the header and fsync regardless of strategy. Data reaches
    /// disk before the header is marked clean.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.header.flags &= !FLAG_DIRTY;
        self.write_header()?;
        self.file.sync_all()?;
        self.unsynced_writes = 0;
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Writes the header, syncs to disk and releases the file lock
    pub fn close(mut self) -> Result<()> {
        self.sync()?;
        self.file.unlock()?;
        tracing::info!(
            path = %self.config.path.display(),
            records = self.header.record_count,
            "Closed database"
        );
        Ok(())
    }

    // =========================================================================
    // Cursor Support
    // =========================================================================

    /// Mutation counter; unchanged generation means an unchanged table
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// First live record in bucket order
    pub fn first_position(&self) -> Option<Position> {
        self.position_from(0)
    }

    /// Record after `position` in bucket order (chain order within a bucket)
    pub fn next_position(&mut self, position: Position) -> Result<Option<Position>> {
        let region = self.region();
        let header = read_slot_header(&mut self.file, position.offset, region, SlotTag::Live)?;
        if header.next != 0 {
            return Ok(Some(Position {
                bucket: position.bucket,
                offset: header.next,
            }));
        }
        Ok(self.position_from(position.bucket + 1))
    }

    /// Key and value of the record at `offset`
    pub fn read_record(&mut self, offset: u64) -> Result<(Vec<u8>, Vec<u8>)> {
        let region = self.region();
        let header = read_slot_header(&mut self.file, offset, region, SlotTag::Live)?;
        let mut key = self.file.read_vec(offset + SLOT_HEADER_SIZE, header.payload_len())?;
        let value = key.split_off(header.key_len as usize);
        header.verify(&key, &value, offset)?;
        Ok((key, value))
    }

    /// Key of the record at `offset`
    pub fn read_key(&mut self, offset: u64) -> Result<Vec<u8>> {
        let region = self.region();
        let header = read_slot_header(&mut self.file, offset, region, SlotTag::Live)?;
        self.file.read_vec(offset + SLOT_HEADER_SIZE, header.key_len as u64)
    }

    /// Upper bound on records a scan may visit before it must be looping
    pub fn max_slots(&self) -> u64 {
        self.region().max_slots()
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn stats(&self) -> Stats {
        Stats {
            record_count: self.header.record_count,
            bucket_count: self.header.bucket_count,
            used_buckets: (0..self.buckets.len())
                .filter(|&bucket| self.buckets.head(bucket) != 0)
                .count(),
            file_size: self.allocator.high_water(),
            data_start: self.header.data_start(),
            free_slots: self.allocator.free_slots(),
            free_bytes: self.allocator.free_bytes(),
        }
    }

    /// Walk every chain and the free list and check the space accounting
    ///
    /// Fails with `Corrupt` when the live count disagrees with the header,
    /// a record sits in the wrong bucket or fails its checksum, regions
    /// overlap, or header + live + free bytes differ from the file size.
    pub fn verify(&mut self) -> Result<IntegrityReport> {
        let region = self.region();
        let mut extents: Vec<(u64, u64)> = Vec::new();
        let mut report = IntegrityReport {
            live_records: 0,
            live_bytes: 0,
            free_slots: 0,
            free_bytes: 0,
            header_bytes: region.start,
            file_size: region.end,
            longest_chain: 0,
        };

        for bucket in 0..self.buckets.len() {
            let mut offset = self.buckets.head(bucket);
            let mut chain = 0u64;
            while offset != 0 {
                chain += 1;
                if chain > region.max_slots() {
                    return Err(HashKvError::corrupt(format!(
                        "cycle detected in chain of bucket {}",
                        bucket
                    )));
                }
                let header = read_slot_header(&mut self.file, offset, region, SlotTag::Live)?;
                let (key, _) = self.read_record(offset)?;
                if self.buckets.bucket_for(&key) != bucket {
                    return Err(HashKvError::corrupt(format!(
                        "record at {} hashed to bucket {} but chained in bucket {}",
                        offset,
                        self.buckets.bucket_for(&key),
                        bucket
                    )));
                }
                extents.push((offset, header.slot_size()));
                report.live_records += 1;
                report.live_bytes += header.slot_size();
                offset = header.next;
            }
            report.longest_chain = report.longest_chain.max(chain);
        }

        let free: Vec<_> = self.allocator.iter().copied().collect();
        for slot in free {
            let header = read_slot_header(&mut self.file, slot.offset, region, SlotTag::Free)?;
            if header.capacity != slot.capacity {
                return Err(HashKvError::corrupt(format!(
                    "free slot at {} has capacity {} on disk, {} in memory",
                    slot.offset, header.capacity, slot.capacity
                )));
            }
            extents.push((slot.offset, slot.slot_size()));
            report.free_slots += 1;
            report.free_bytes += slot.slot_size();
        }

        if report.live_records != self.header.record_count {
            return Err(HashKvError::corrupt(format!(
                "header counts {} records but {} are reachable",
                self.header.record_count, report.live_records
            )));
        }

        extents.sort_unstable();
        for pair in extents.windows(2) {
            let (start, size) = pair[0];
            if start + size > pair[1].0 {
                return Err(HashKvError::corrupt(format!(
                    "slot at {} overlaps slot at {}",
                    start, pair[1].0
                )));
            }
        }

        let accounted = report.header_bytes + report.live_bytes + report.free_bytes;
        if accounted != report.file_size {
            return Err(HashKvError::corrupt(format!(
                "space accounting mismatch: header {} + live {} + free {} != file size {}",
                report.header_bytes, report.live_bytes, report.free_bytes, report.file_size
            )));
        }

        let physical = self.file.len()?;
        if physical != report.file_size {
            return Err(HashKvError::corrupt(format!(
                "file is {} bytes but high-water mark is {}",
                physical, report.file_size
            )));
        }

        Ok(report)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the backing file path
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Get the bucket count recorded in the file
    pub fn bucket_count(&self) -> u64 {
        self.header.bucket_count
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn initialize(file: &mut DataFile, bucket_count: u64) -> Result<FileHeader> {
        let header = FileHeader::new(bucket_count);
        // set_len zero-fills, which is exactly an empty bucket array
        file.set_len(header.file_size)?;
        file.write_at(0, &header.encode()?)?;
        file.sync_all()?;
        tracing::debug!(buckets = bucket_count, "Initialized new database file");
        Ok(header)
    }

    fn read_header(file: &mut DataFile) -> Result<FileHeader> {
        let len = file.len()?;
        if len < HEADER_SIZE {
            return Err(HashKvError::corrupt(format!(
                "file of {} bytes is too short for a header",
                len
            )));
        }

        let mut raw = [0u8; HEADER_SIZE as usize];
        file.read_at(0, &mut raw)?;
        FileHeader::decode(&raw)
    }

    fn region(&self) -> Region {
        Region::new(self.header.data_start(), self.allocator.high_water())
    }

    fn lookup(&mut self, key: &[u8]) -> Result<Lookup> {
        let region = self.region();
        self.buckets.find(&mut self.file, key, region)
    }

    fn read_value(&mut self, located: &Located) -> Result<Vec<u8>> {
        let header = located.header;
        let mut key = self
            .file
            .read_vec(located.offset + SLOT_HEADER_SIZE, header.payload_len())?;
        let value = key.split_off(header.key_len as usize);
        header.verify(&key, &value, located.offset)?;
        Ok(value)
    }

    /// Allocate and fully write a new slot; returns its offset
    fn write_slot(&mut self, key: &[u8], value: &[u8], next: u64) -> Result<u64> {
        let allocation = self
            .allocator
            .allocate(&mut self.file, payload_size(key, value))?;
        let bytes = encode_record(key, value, allocation.capacity, next)?;
        self.file.write_at(allocation.offset, &bytes)?;
        if allocation.extended {
            // Cover the slack so the file length tracks the high-water mark
            self.file.set_len(self.allocator.high_water())?;
        }
        Ok(allocation.offset)
    }

    /// Point `prev` (or the bucket head) at `target`
    fn link(&mut self, bucket: usize, prev: Option<u64>, target: u64) -> Result<()> {
        match prev {
            None => self.buckets.set_head(&mut self.file, bucket, target),
            Some(prev) => self.file.write_u64(prev + NEXT_FIELD_OFFSET, target),
        }
    }

    fn insert(&mut self, bucket: usize, tail: Option<u64>, key: &[u8], value: &[u8]) -> Result<()> {
        let offset = self.write_slot(key, value, 0)?;
        self.link(bucket, tail, offset)?;
        self.header.record_count += 1;
        Ok(())
    }

    fn overwrite(&mut self, located: &Located, key: &[u8], value: &[u8]) -> Result<()> {
        let header = located.header;
        if payload_size(key, value) <= header.capacity {
            let bytes = encode_record(key, value, header.capacity, header.next)?;
            return self.file.write_at(located.offset, &bytes);
        }

        let offset = self.write_slot(key, value, header.next)?;
        self.link(located.bucket, located.prev, offset)?;
        self.allocator
            .release(&mut self.file, located.offset, header.capacity)
    }

    fn unlink(&mut self, located: &Located) -> Result<()> {
        self.link(located.bucket, located.prev, located.header.next)?;
        self.allocator
            .release(&mut self.file, located.offset, located.header.capacity)?;
        self.header.record_count = self.header.record_count.saturating_sub(1);
        Ok(())
    }

    fn position_from(&self, bucket: usize) -> Option<Position> {
        self.buckets.next_occupied(bucket).map(|bucket| Position {
            bucket,
            offset: self.buckets.head(bucket),
        })
    }

    /// Mark the header dirty before the first write since the last sync
    fn begin_write(&mut self) -> Result<()> {
        if !self.header.is_dirty() {
            self.header.flags |= FLAG_DIRTY;
            self.write_header()?;
        }
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let bytes = self.header.encode()?;
        self.file.write_at(0, &bytes)
    }

    /// Persist header bookkeeping after a mutation and sync per strategy
    fn commit(&mut self) -> Result<()> {
        self.header.file_size = self.allocator.high_water();
        self.header.free_head = self.allocator.head();
        self.write_header()?;

        self.unsynced_writes += 1;
        let due = match self.config.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNWrites { count } => self.unsynced_writes >= count,
            SyncStrategy::OnClose => false,
        };
        if due {
            self.file.sync_data()?;
            self.unsynced_writes = 0;
        }
        Ok(())
    }
}
