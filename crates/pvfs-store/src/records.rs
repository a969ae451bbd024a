//! Memory-mapped record table (`records.dat`).
//!
//! Fixed-width slots addressed by file id. Fields are read and written as
//! atomics through the mapping; a striped seqlock gives readers a consistent
//! snapshot of a whole record. Growing the file remaps it under the map's
//! write lock, so every other access only needs the read side.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};
use pvfs_config::{log_store_debug, log_store_info, log_store_warn};

use crate::error::{ErrorCategory, Result, StoreError};
use crate::layout::*;
use crate::locks::StripedStampLocks;

pub const RECORDS_FILE: &str = "records.dat";

const STAMP_STRIPES: usize = 64;
/// Records copied out per batch in `for_each`; the map lock is not held
/// while visiting.
const VISIT_BATCH: u32 = 512;

fn u32_at(map: &MmapMut, offset: usize) -> &AtomicU32 {
    debug_assert!(offset % 4 == 0 && offset + 4 <= map.len());
    // SAFETY: offset is in bounds and 4-aligned (page-aligned base, repr(C) layout);
    // all concurrent access to the word goes through atomics.
    unsafe { &*(map.as_ptr().add(offset) as *const AtomicU32) }
}

fn u64_at(map: &MmapMut, offset: usize) -> &AtomicU64 {
    debug_assert!(offset % 8 == 0 && offset + 8 <= map.len());
    // SAFETY: as above, with 8-byte alignment guaranteed by the layout asserts.
    unsafe { &*(map.as_ptr().add(offset) as *const AtomicU64) }
}

fn record_offset(id: u32) -> usize {
    HEADER_SIZE + (id as usize - 1) * RECORD_SIZE
}

fn capacity_of(map: &MmapMut) -> usize {
    (map.len() - HEADER_SIZE) / RECORD_SIZE
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The record table
pub struct RecordTable {
    path: PathBuf,
    file: File,
    map: RwLock<MmapMut>,
    alloc: Mutex<()>,
    stamps: StripedStampLocks,
    dirty: AtomicBool,
    fresh: bool,
    closed_properly: bool,
}

impl RecordTable {
    /// Open `records.dat` in `root`, creating it if absent.
    ///
    /// A header that fails validation is reported as corruption so the
    /// connection manager can rebuild.
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(RECORDS_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len() as usize;
        let fresh = len == 0;
        if fresh {
            file.set_len((HEADER_SIZE + INITIAL_CAPACITY * RECORD_SIZE) as u64)?;
        } else if len < HEADER_SIZE + RECORD_SIZE {
            return Err(StoreError::corrupted(
                ErrorCategory::HeaderCorrupted,
                format!("records file too short: {} bytes", len),
            ));
        }

        // SAFETY: the file is owned by this table; concurrent access goes through atomics.
        let map = unsafe { MmapMut::map_mut(&file)? };

        if fresh {
            let created_at = now_millis();
            u32_at(&map, OFF_MAGIC).store(RECORDS_MAGIC, Ordering::Relaxed);
            u32_at(&map, OFF_VERSION).store(0, Ordering::Relaxed);
            u64_at(&map, OFF_CREATED_AT).store(created_at, Ordering::Relaxed);
            u32_at(&map, OFF_CRC32).store(header_crc(RECORDS_MAGIC, 0, created_at), Ordering::Relaxed);
            u32_at(&map, OFF_CONNECTION_STATUS).store(STATUS_SAFELY_CLOSED, Ordering::Release);
            map.flush()?;
            log_store_info!("Created record table", path = tracing::field::display(path.display()));
        } else {
            let magic = u32_at(&map, OFF_MAGIC).load(Ordering::Relaxed);
            if magic != RECORDS_MAGIC {
                return Err(StoreError::corrupted(
                    ErrorCategory::HeaderCorrupted,
                    format!("invalid records magic: {:x}", magic),
                ));
            }
            let version = u32_at(&map, OFF_VERSION).load(Ordering::Relaxed);
            let created_at = u64_at(&map, OFF_CREATED_AT).load(Ordering::Relaxed);
            let stored = u32_at(&map, OFF_CRC32).load(Ordering::Relaxed);
            let computed = header_crc(magic, version, created_at);
            if stored != computed {
                return Err(StoreError::corrupted(
                    ErrorCategory::HeaderCorrupted,
                    format!("header crc mismatch: stored {:x}, computed {:x}", stored, computed),
                ));
            }
            let count = u32_at(&map, OFF_RECORD_COUNT).load(Ordering::Relaxed) as usize;
            if count > capacity_of(&map) {
                return Err(StoreError::corrupted(
                    ErrorCategory::HeaderCorrupted,
                    format!("record count {} exceeds file capacity {}", count, capacity_of(&map)),
                ));
            }
        }

        let closed_properly =
            u32_at(&map, OFF_CONNECTION_STATUS).load(Ordering::Acquire) == STATUS_SAFELY_CLOSED;
        if !closed_properly {
            log_store_warn!("Record table was not closed properly", path = tracing::field::display(path.display()));
        }

        Ok(Self {
            path,
            file,
            map: RwLock::new(map),
            alloc: Mutex::new(()),
            stamps: StripedStampLocks::new(STAMP_STRIPES),
            dirty: AtomicBool::new(fresh),
            fresh,
            closed_properly,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the file did not exist before this open
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Connection status observed at open time
    pub fn was_closed_properly(&self) -> bool {
        self.closed_properly
    }

    // ---- header ---------------------------------------------------------

    pub fn version(&self) -> u32 {
        u32_at(&self.map.read(), OFF_VERSION).load(Ordering::Acquire)
    }

    /// The CRC covers the version, so it is rewritten too.
    pub fn set_version(&self, version: u32) -> Result<()> {
        let map = self.map.read();
        let created_at = u64_at(&map, OFF_CREATED_AT).load(Ordering::Relaxed);
        u32_at(&map, OFF_VERSION).store(version, Ordering::Release);
        u32_at(&map, OFF_CRC32).store(header_crc(RECORDS_MAGIC, version, created_at), Ordering::Release);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub fn created_at(&self) -> u64 {
        u64_at(&self.map.read(), OFF_CREATED_AT).load(Ordering::Relaxed)
    }

    pub fn global_mod_count(&self) -> u64 {
        u64_at(&self.map.read(), OFF_GLOBAL_MOD_COUNT).load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> u32 {
        u32_at(&self.map.read(), OFF_ERROR_COUNT).load(Ordering::Acquire)
    }

    /// Returns the new count.
    pub fn increment_error_count(&self) -> u32 {
        let map = self.map.read();
        self.dirty.store(true, Ordering::Release);
        u32_at(&map, OFF_ERROR_COUNT).fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn header_flags(&self) -> u32 {
        u32_at(&self.map.read(), OFF_FLAGS).load(Ordering::Acquire)
    }

    pub fn set_header_flag(&self, flag: u32) {
        let map = self.map.read();
        u32_at(&map, OFF_FLAGS).fetch_or(flag, Ordering::AcqRel);
        self.dirty.store(true, Ordering::Release);
    }

    /// Mark the table as in use (`true`) or safely closed (`false`).
    pub fn set_connected(&self, connected: bool) {
        let status = if connected {
            STATUS_CONNECTED
        } else {
            STATUS_SAFELY_CLOSED
        };
        u32_at(&self.map.read(), OFF_CONNECTION_STATUS).store(status, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
    }

    // ---- records --------------------------------------------------------

    /// Highest id handed out so far; valid ids are `1..=max_allocated_id()`.
    pub fn max_allocated_id(&self) -> u32 {
        u32_at(&self.map.read(), OFF_RECORD_COUNT).load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        capacity_of(&self.map.read())
    }

    pub fn check_id(&self, id: u32) -> Result<()> {
        let max = self.max_allocated_id();
        if id == NULL_ID || id > max {
            return Err(StoreError::InvalidFileId { id, max });
        }
        Ok(())
    }

    fn next_mod_count(map: &MmapMut) -> u64 {
        u64_at(map, OFF_GLOBAL_MOD_COUNT).fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn read_field(&self, id: u32, field: RecordField) -> Result<u64> {
        self.check_id(id)?;
        let map = self.map.read();
        let offset = record_offset(id) + field.offset();
        Ok(if field.is_wide() {
            u64_at(&map, offset).load(Ordering::Acquire)
        } else {
            u32_at(&map, offset).load(Ordering::Acquire) as u64
        })
    }

    /// Store `value` into `field` of record `id`.
    ///
    /// Returns `false` without touching any counter when the value is unchanged;
    /// otherwise stamps the record with a fresh global mod count.
    pub fn write_field(&self, id: u32, field: RecordField, value: u64) -> Result<bool> {
        self.check_id(id)?;
        if !field.is_wide() && value > u32::MAX as u64 {
            return Err(StoreError::InvalidArgument(format!(
                "{:?} value {} does not fit in 32 bits",
                field, value
            )));
        }
        let map = self.map.read();
        let base = record_offset(id);
        let _stamp = self.stamps.write(id);
        let changed = if field.is_wide() {
            u64_at(&map, base + field.offset()).swap(value, Ordering::AcqRel) != value
        } else {
            u32_at(&map, base + field.offset()).swap(value as u32, Ordering::AcqRel) != value as u32
        };
        if changed {
            let stamp = Self::next_mod_count(&map);
            u64_at(&map, base + OFF_RECORD_MOD_COUNT).store(stamp, Ordering::Release);
            self.dirty.store(true, Ordering::Release);
        }
        Ok(changed)
    }

    /// Apply `update` to the flags of `id` atomically with respect to other writers.
    pub fn update_flags(&self, id: u32, update: impl FnOnce(RecordFlags) -> RecordFlags) -> Result<bool> {
        self.check_id(id)?;
        let map = self.map.read();
        let base = record_offset(id);
        let _stamp = self.stamps.write(id);
        let word = u32_at(&map, base + RecordField::Flags.offset());
        let old = word.load(Ordering::Acquire);
        let new = update(RecordFlags::from_bits_retain(old)).bits();
        if old == new {
            return Ok(false);
        }
        word.store(new, Ordering::Release);
        let stamp = Self::next_mod_count(&map);
        u64_at(&map, base + OFF_RECORD_MOD_COUNT).store(stamp, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
        Ok(true)
    }

    /// Stamp `id` with a fresh mod count without changing any field.
    pub fn touch(&self, id: u32) -> Result<u64> {
        self.check_id(id)?;
        let map = self.map.read();
        let _stamp = self.stamps.write(id);
        let stamp = Self::next_mod_count(&map);
        u64_at(&map, record_offset(id) + OFF_RECORD_MOD_COUNT).store(stamp, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
        Ok(stamp)
    }

    pub fn mod_count(&self, id: u32) -> Result<u64> {
        self.check_id(id)?;
        let map = self.map.read();
        Ok(u64_at(&map, record_offset(id) + OFF_RECORD_MOD_COUNT).load(Ordering::Acquire))
    }

    /// Consistent snapshot of every field of `id`.
    pub fn record(&self, id: u32) -> Result<FileRecord> {
        self.check_id(id)?;
        let map = self.map.read();
        Ok(self.stamps.read(id, || Self::load_record(&map, id)))
    }

    fn load_record(map: &MmapMut, id: u32) -> FileRecord {
        let base = record_offset(id);
        let word = |field: RecordField| u32_at(map, base + field.offset()).load(Ordering::Acquire);
        let wide = |field: RecordField| u64_at(map, base + field.offset()).load(Ordering::Acquire);
        FileRecord {
            parent_id: word(RecordField::Parent),
            name_id: word(RecordField::Name),
            flags: word(RecordField::Flags),
            attribute_ref: word(RecordField::AttributeRef),
            content_ref: word(RecordField::ContentRef),
            _reserved: 0,
            length: wide(RecordField::Length),
            timestamp: wide(RecordField::Timestamp),
            mod_count: u64_at(map, base + OFF_RECORD_MOD_COUNT).load(Ordering::Acquire),
        }
    }

    /// Zero every field of `id` except `keep` flags and stamp it.
    pub fn clean(&self, id: u32, keep: RecordFlags) -> Result<()> {
        self.check_id(id)?;
        let map = self.map.read();
        let base = record_offset(id);
        let _stamp = self.stamps.write(id);
        for field in RecordField::ALL {
            if field.is_wide() {
                u64_at(&map, base + field.offset()).store(0, Ordering::Release);
            } else {
                u32_at(&map, base + field.offset()).store(0, Ordering::Release);
            }
        }
        u32_at(&map, base + RecordField::Flags.offset()).store(keep.bits(), Ordering::Release);
        let stamp = Self::next_mod_count(&map);
        u64_at(&map, base + OFF_RECORD_MOD_COUNT).store(stamp, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Append a blank record at `max_allocated_id() + 1`, growing the file if needed.
    pub fn allocate(&self) -> Result<u32> {
        let _alloc = self.alloc.lock();
        let id = self
            .max_allocated_id()
            .checked_add(1)
            .ok_or_else(|| StoreError::InvalidArgument("record id space exhausted".to_string()))?;
        if id as usize > self.capacity() {
            self.grow(id as usize)?;
        }

        let map = self.map.read();
        let base = record_offset(id);
        {
            let _stamp = self.stamps.write(id);
            for field in RecordField::ALL {
                if field.is_wide() {
                    u64_at(&map, base + field.offset()).store(0, Ordering::Relaxed);
                } else {
                    u32_at(&map, base + field.offset()).store(0, Ordering::Relaxed);
                }
            }
            let stamp = Self::next_mod_count(&map);
            u64_at(&map, base + OFF_RECORD_MOD_COUNT).store(stamp, Ordering::Release);
        }
        u32_at(&map, OFF_RECORD_COUNT).store(id, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
        Ok(id)
    }

    fn grow(&self, min_records: usize) -> Result<()> {
        let mut map = self.map.write();
        let current = capacity_of(&map);
        if min_records <= current {
            return Ok(());
        }
        let mut capacity = current.max(INITIAL_CAPACITY);
        while capacity < min_records {
            capacity *= 2;
        }
        self.file.set_len((HEADER_SIZE + capacity * RECORD_SIZE) as u64)?;
        // SAFETY: exclusive map lock; no references into the old mapping survive.
        *map = unsafe { MmapMut::map_mut(&self.file)? };
        log_store_debug!("Grew record table", capacity = capacity as u64);
        Ok(())
    }

    /// Visit every record allocated at call time in id order; stop when
    /// `visit` returns false.
    ///
    /// Records are read in batches, so `visit` may allocate or write.
    pub fn for_each(&self, mut visit: impl FnMut(u32, &FileRecord) -> bool) -> Result<()> {
        let max = self.max_allocated_id();
        let mut batch = Vec::with_capacity(VISIT_BATCH.min(max) as usize);
        let mut first = 1u32;
        while first <= max {
            let last = max.min(first.saturating_add(VISIT_BATCH - 1));
            {
                let map = self.map.read();
                batch.extend((first..=last).map(|id| self.stamps.read(id, || Self::load_record(&map, id))));
            }
            for (id, record) in (first..=last).zip(batch.drain(..)) {
                if !visit(id, &record) {
                    return Ok(());
                }
            }
            match last.checked_add(1) {
                Some(next) => first = next,
                None => break,
            }
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.map.read().flush() {
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn remove_file(root: &Path) -> Result<()> {
        match std::fs::remove_file(root.join(RECORDS_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_visitor_may_grow_table() {
        let temp = tempdir().unwrap();
        let table = RecordTable::open(temp.path()).unwrap();
        table.allocate().unwrap();
        let mut visited = Vec::new();
        table
            .for_each(|id, _| {
                visited.push(id);
                while table.capacity() <= INITIAL_CAPACITY {
                    table.allocate().unwrap();
                }
                true
            })
            .unwrap();
        assert_eq!(visited, vec![1]);
        assert!(table.capacity() > INITIAL_CAPACITY);
    }

    #[test]
    fn test_for_each_spans_batches_and_stops_early() {
        let temp = tempdir().unwrap();
        let table = RecordTable::open(temp.path()).unwrap();
        let total = VISIT_BATCH * 2 + 3;
        for _ in 0..total {
            table.allocate().unwrap();
        }
        let mut seen = 0u32;
        table
            .for_each(|id, _| {
                seen += 1;
                assert_eq!(id, seen);
                true
            })
            .unwrap();
        assert_eq!(seen, total);

        let mut stopped_at = 0;
        table
            .for_each(|id, _| {
                stopped_at = id;
                id < VISIT_BATCH + 1
            })
            .unwrap();
        assert_eq!(stopped_at, VISIT_BATCH + 1);
    }

    #[test]
    fn test_fresh_table() {
        let temp = tempdir().unwrap();
        let table = RecordTable::open(temp.path()).unwrap();
        assert!(table.is_fresh());
        assert!(table.was_closed_properly());
        assert_eq!(table.version(), 0);
        assert_eq!(table.max_allocated_id(), 0);
        assert_eq!(table.capacity(), INITIAL_CAPACITY);
    }

    #[test]
    fn test_allocate_is_sequential_and_stamped() {
        let temp = tempdir().unwrap();
        let table = RecordTable::open(temp.path()).unwrap();
        let a = table.allocate().unwrap();
        let b = table.allocate().unwrap();
        assert_eq!((a, b), (1, 2));
        assert!(table.mod_count(b).unwrap() > table.mod_count(a).unwrap());
        assert!(table.record(b).unwrap().is_blank());
    }

    #[test]
    fn test_out_of_range_ids() {
        let temp = tempdir().unwrap();
        let table = RecordTable::open(temp.path()).unwrap();
        table.allocate().unwrap();
        assert!(matches!(
            table.read_field(0, RecordField::Parent),
            Err(StoreError::InvalidFileId { id: 0, max: 1 })
        ));
        assert!(matches!(
            table.write_field(2, RecordField::Parent, 1),
            Err(StoreError::InvalidFileId { id: 2, max: 1 })
        ));
    }

    #[test]
    fn test_unchanged_write_does_not_bump() {
        let temp = tempdir().unwrap();
        let table = RecordTable::open(temp.path()).unwrap();
        let id = table.allocate().unwrap();

        assert!(table.write_field(id, RecordField::Length, 42).unwrap());
        let stamp = table.mod_count(id).unwrap();
        let global = table.global_mod_count();

        assert!(!table.write_field(id, RecordField::Length, 42).unwrap());
        assert_eq!(table.mod_count(id).unwrap(), stamp);
        assert_eq!(table.global_mod_count(), global);

        assert!(table.write_field(id, RecordField::Length, 43).unwrap());
        assert_eq!(table.mod_count(id).unwrap(), global + 1);
    }

    #[test]
    fn test_narrow_field_rejects_wide_value() {
        let temp = tempdir().unwrap();
        let table = RecordTable::open(temp.path()).unwrap();
        let id = table.allocate().unwrap();
        assert!(matches!(
            table.write_field(id, RecordField::Name, u64::from(u32::MAX) + 1),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(table
            .write_field(id, RecordField::Timestamp, u64::from(u32::MAX) + 1)
            .unwrap());
    }

    #[test]
    fn test_growth_preserves_records() {
        let temp = tempdir().unwrap();
        let table = RecordTable::open(temp.path()).unwrap();
        for _ in 0..INITIAL_CAPACITY + 10 {
            let id = table.allocate().unwrap();
            table.write_field(id, RecordField::Parent, id as u64).unwrap();
        }
        assert!(table.capacity() >= INITIAL_CAPACITY + 10);
        for id in [1, 512, INITIAL_CAPACITY as u32, INITIAL_CAPACITY as u32 + 10] {
            assert_eq!(table.read_field(id, RecordField::Parent).unwrap(), id as u64);
        }
    }

    #[test]
    fn test_reopen_keeps_data_and_status() {
        let temp = tempdir().unwrap();
        {
            let table = RecordTable::open(temp.path()).unwrap();
            table.set_version(FORMAT_VERSION).unwrap();
            let id = table.allocate().unwrap();
            table.write_field(id, RecordField::Name, 7).unwrap();
            table.set_connected(true);
            table.flush().unwrap();
        }
        let table = RecordTable::open(temp.path()).unwrap();
        assert!(!table.is_fresh());
        assert!(!table.was_closed_properly());
        assert_eq!(table.version(), FORMAT_VERSION);
        assert_eq!(table.read_field(1, RecordField::Name).unwrap(), 7);
    }

    #[test]
    fn test_corrupted_header_rejected() {
        let temp = tempdir().unwrap();
        {
            let table = RecordTable::open(temp.path()).unwrap();
            table.allocate().unwrap();
            table.flush().unwrap();
        }
        let path = temp.path().join(RECORDS_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[OFF_CREATED_AT] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = RecordTable::open(temp.path()).err().unwrap();
        assert_eq!(err.corruption_category(), Some(ErrorCategory::HeaderCorrupted));
    }

    #[test]
    fn test_clean_keeps_requested_flags() {
        let temp = tempdir().unwrap();
        let table = RecordTable::open(temp.path()).unwrap();
        let id = table.allocate().unwrap();
        table.write_field(id, RecordField::Parent, 1).unwrap();
        table
            .update_flags(id, |f| f | RecordFlags::FREE_RECORD | RecordFlags::DIRECTORY)
            .unwrap();

        table.clean(id, RecordFlags::FREE_RECORD).unwrap();
        let record = table.record(id).unwrap();
        assert!(record.is_blank());
        assert_eq!(record.flags(), RecordFlags::FREE_RECORD);
    }

    #[test]
    fn test_concurrent_writers_and_snapshots() {
        let temp = tempdir().unwrap();
        let table = Arc::new(RecordTable::open(temp.path()).unwrap());
        for _ in 0..8 {
            table.allocate().unwrap();
        }

        let writers: Vec<_> = (1..=4u32)
            .map(|id| {
                let table = table.clone();
                thread::spawn(move || {
                    for i in 1..=1000u64 {
                        table.write_field(id, RecordField::Length, i).unwrap();
                    }
                })
            })
            .collect();
        let grower = {
            let table = table.clone();
            thread::spawn(move || {
                for _ in 0..2000 {
                    table.allocate().unwrap();
                }
            })
        };
        for writer in writers {
            writer.join().unwrap();
        }
        grower.join().unwrap();

        for id in 1..=4 {
            assert_eq!(table.record(id).unwrap().length, 1000);
        }
        assert_eq!(table.max_allocated_id(), 2008);
        // 8 + 2000 allocations, 4000 changed writes
        assert_eq!(table.global_mod_count(), 2008 + 4000);
    }
}
