//! # pvfs-cas
//!
//! Content-addressed, deduplicated blob storage for the pvfs record store.
//!
//! Blobs are identified by a BLAKE3 hash computed over
//! `decimal(len) ++ "\0" ++ bytes`, so that a blob can never collide with a
//! prefix of a longer one that happens to hash the same way. Every distinct
//! hash is stored exactly once and gets a small positive [`ContentId`].
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! ├── contents.dat   # append-only blob bytes
//! └── contents.idx   # 16-byte header + 48-byte entries (hash, offset, len)
//! ```
//!
//! Content id `n` is the `n`-th index entry. Nothing is ever deleted: the
//! dedup history is worth more than the reclaimed space.

mod index;

pub use index::{IndexEntry, INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE, INDEX_MAGIC};

use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// BLAKE3 hash type (32 bytes)
pub type Blake3Hash = [u8; 32];

/// Identity of a stored blob; 0 is never a valid id.
pub type ContentId = u32;

pub const DATA_FILE: &str = "contents.dat";
pub const INDEX_FILE: &str = "contents.idx";

/// Errors that can occur during CAS operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Content not found: {id}")]
    NotFound { id: ContentId },

    #[error("Hash mismatch for content {id}: expected {expected}, got {actual}")]
    HashMismatch {
        id: ContentId,
        expected: String,
        actual: String,
    },

    #[error("Content storage corrupted: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, CasError>;

struct Writer {
    data: File,
    index: File,
    data_len: u64,
}

/// Content-Addressable Storage store
pub struct ContentStore {
    root: PathBuf,
    writer: Mutex<Writer>,
    reader: File,
    locations: RwLock<Vec<IndexEntry>>,
    by_hash: DashMap<Blake3Hash, ContentId>,
    version: AtomicU32,
    dirty: AtomicBool,
    fresh: bool,
    /// Description of index entries dropped at open, if any
    damage: Mutex<Option<String>>,
}

impl ContentStore {
    /// Open the store at `root`, creating empty files (version 0) if missing.
    ///
    /// Index entries that point past the end of the data file, or a torn
    /// trailing entry, are not loaded; [`ContentStore::damage`] reports them
    /// and [`ContentStore::repair`] drops them from disk.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let data_path = root.join(DATA_FILE);
        let index_path = root.join(INDEX_FILE);

        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&data_path)?;
        let index = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&index_path)?;
        let reader = File::open(&data_path)?;

        let data_len = data.metadata()?.len();
        let index_len = index.metadata()?.len();
        let fresh = index_len == 0;

        let mut damage = None;
        let (version, entries) = if fresh {
            index::write_header(&index, 0)?;
            debug!(path = %root.display(), "Created new content store");
            (0, Vec::new())
        } else {
            let version = index::read_header(&index)?;
            let (entries, torn) = index::read_entries(&index, index_len)?;
            let valid = entries
                .iter()
                .take_while(|e| e.offset + e.len <= data_len)
                .count();
            if valid < entries.len() || torn {
                let msg = format!(
                    "{} of {} index entries point past end of data ({} bytes){}",
                    entries.len() - valid,
                    entries.len(),
                    data_len,
                    if torn { ", trailing entry torn" } else { "" }
                );
                warn!(path = %root.display(), "{}", msg);
                damage = Some(msg);
            }
            (version, entries.into_iter().take(valid).collect::<Vec<_>>())
        };

        let by_hash = DashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            by_hash.entry(entry.hash).or_insert(i as ContentId + 1);
        }

        Ok(Self {
            root,
            writer: Mutex::new(Writer {
                data,
                index,
                data_len,
            }),
            reader,
            locations: RwLock::new(entries),
            by_hash,
            version: AtomicU32::new(version),
            dirty: AtomicBool::new(false),
            fresh,
            damage: Mutex::new(damage),
        })
    }

    /// Compute the content hash of the given bytes.
    pub fn compute_hash(data: &[u8]) -> Blake3Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(data.len().to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Convert a hash to its hex string representation.
    #[inline]
    pub fn hash_to_hex(hash: &Blake3Hash) -> String {
        hex::encode(hash)
    }

    /// Parse a hex string into a hash.
    pub fn hex_to_hash(text: &str) -> Option<Blake3Hash> {
        let bytes = hex::decode(text).ok()?;
        bytes.try_into().ok()
    }

    /// Store bytes, returning the id of the (possibly pre-existing) blob.
    ///
    /// Idempotent: byte-identical input always yields the same id.
    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    pub fn store(&self, data: &[u8]) -> Result<ContentId> {
        let hash = Self::compute_hash(data);

        // Deduplication: skip if already stored
        if let Some(id) = self.by_hash.get(&hash) {
            return Ok(*id);
        }

        let mut writer = self.writer.lock();
        // Another writer may have stored the same bytes while we waited
        if let Some(id) = self.by_hash.get(&hash) {
            return Ok(*id);
        }

        let entry = IndexEntry {
            hash,
            offset: writer.data_len,
            len: data.len() as u64,
        };
        writer.data.write_all_at(data, entry.offset)?;

        let id = {
            let mut locations = self.locations.write();
            let slot = locations.len() as u64;
            index::write_entry(&writer.index, slot, &entry)?;
            locations.push(entry);
            locations.len() as ContentId
        };
        writer.data_len += entry.len;
        self.by_hash.insert(hash, id);
        self.dirty.store(true, Ordering::Release);
        Ok(id)
    }

    /// Read a blob back, verifying its hash.
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self, id: ContentId) -> Result<Vec<u8>> {
        let entry = self.entry(id)?;
        let mut data = vec![0u8; entry.len as usize];
        self.reader.read_exact_at(&mut data, entry.offset)?;

        let actual = Self::compute_hash(&data);
        if actual != entry.hash {
            return Err(CasError::HashMismatch {
                id,
                expected: Self::hash_to_hex(&entry.hash),
                actual: Self::hash_to_hex(&actual),
            });
        }
        Ok(data)
    }

    /// Byte stream over a blob.
    pub fn reader(&self, id: ContentId) -> Result<Cursor<Vec<u8>>> {
        Ok(Cursor::new(self.read(id)?))
    }

    /// Content hash of a stored blob.
    pub fn hash_of(&self, id: ContentId) -> Result<Blake3Hash> {
        Ok(self.entry(id)?.hash)
    }

    /// Length in bytes of a stored blob.
    pub fn len_of(&self, id: ContentId) -> Result<u64> {
        Ok(self.entry(id)?.len)
    }

    /// Id of already-stored content with this hash.
    pub fn find(&self, hash: &Blake3Hash) -> Option<ContentId> {
        self.by_hash.get(hash).map(|id| *id)
    }

    fn entry(&self, id: ContentId) -> Result<IndexEntry> {
        if id == 0 {
            return Err(CasError::NotFound { id });
        }
        self.locations
            .read()
            .get(id as usize - 1)
            .copied()
            .ok_or(CasError::NotFound { id })
    }

    /// Number of stored blobs; also the largest valid id.
    pub fn len(&self) -> u32 {
        self.locations.read().len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the index file did not exist before this open.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    pub fn set_version(&self, version: u32) -> Result<()> {
        let writer = self.writer.lock();
        index::write_header(&writer.index, version)?;
        self.version.store(version, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Damage found while loading the index, if any.
    pub fn damage(&self) -> Option<String> {
        self.damage.lock().clone()
    }

    /// Drop unreadable index entries from disk so the next open is clean.
    pub fn repair(&self) -> Result<()> {
        let writer = self.writer.lock();
        let valid = self.locations.read().len() as u64;
        writer
            .index
            .set_len(INDEX_HEADER_SIZE + valid * INDEX_ENTRY_SIZE as u64)?;
        writer.index.sync_all()?;
        *self.damage.lock() = None;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sync data before index so an index entry never outlives its bytes.
    pub fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let writer = self.writer.lock();
        writer.data.sync_data()?;
        writer.index.sync_data()?;
        Ok(())
    }

    /// Get the root path of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove the store's files. The store must not be used afterwards.
    pub fn remove_files(root: &Path) -> Result<()> {
        for name in [DATA_FILE, INDEX_FILE] {
            match fs::remove_file(root.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Get statistics about the store.
    pub fn stats(&self) -> CasStats {
        let locations = self.locations.read();
        let mut stats = CasStats {
            blob_count: locations.len() as u64,
            ..CasStats::default()
        };
        for entry in locations.iter() {
            stats.total_bytes += entry.len;
            match entry.len {
                0..=1023 => stats.small_blobs += 1,
                1024..=1_048_575 => stats.medium_blobs += 1,
                _ => stats.large_blobs += 1,
            }
        }
        stats
    }
}

/// Statistics about the CAS store
#[derive(Debug, Clone, Default)]
pub struct CasStats {
    /// Number of unique blobs stored
    pub blob_count: u64,
    /// Total bytes stored (deduplicated)
    pub total_bytes: u64,
    /// Blobs < 1KB
    pub small_blobs: u64,
    /// Blobs 1KB - 1MB
    pub medium_blobs: u64,
    /// Blobs > 1MB
    pub large_blobs: u64,
}

impl CasStats {
    /// Calculate average blob size
    pub fn avg_blob_size(&self) -> u64 {
        if self.blob_count == 0 {
            0
        } else {
            self.total_bytes / self.blob_count
        }
    }
}
