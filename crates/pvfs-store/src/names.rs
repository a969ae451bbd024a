//! Interned file names (`names.dat`).
//!
//! Append-only: each name is written once as a length-prefixed UTF-8 string,
//! and its id is its 1-based position in the file. Id 0 means "no name".
//!
//! ```text
//! offset  field      size
//! ------  --------   ----
//!  0      magic       4   ("PNMS")
//!  4      version     4
//!  8      reserved    8
//! 16      entries     len(4, LE) + bytes
//! ```

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use pvfs_config::{log_store_info, log_store_warn};

use crate::error::{ErrorCategory, Result, StoreError};

pub const NAMES_FILE: &str = "names.dat";

/// Names file magic number: "PNMS" in little-endian
const NAMES_MAGIC: u32 = 0x534D_4E50;

const NAMES_HEADER_SIZE: u64 = 16;

/// Longest name accepted, in bytes
pub const MAX_NAME_LEN: usize = 64 * 1024;

struct NameWriter {
    file: File,
    len: u64,
}

/// Bidirectional name ↔ id table
pub struct NameStore {
    writer: Mutex<NameWriter>,
    ids: DashMap<Arc<str>, u32>,
    names: RwLock<Vec<Arc<str>>>,
    version: AtomicU32,
    dirty: AtomicBool,
    fresh: bool,
    damage: Mutex<Option<String>>,
}

impl NameStore {
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(NAMES_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let file_len = file.metadata()?.len();
        let fresh = file_len == 0;

        if fresh {
            write_header(&file, 0)?;
            return Ok(Self {
                writer: Mutex::new(NameWriter {
                    file,
                    len: NAMES_HEADER_SIZE,
                }),
                ids: DashMap::new(),
                names: RwLock::new(Vec::new()),
                version: AtomicU32::new(0),
                dirty: AtomicBool::new(true),
                fresh,
                damage: Mutex::new(None),
            });
        }

        let mut raw = vec![0u8; file_len as usize];
        file.read_exact_at(&mut raw, 0)?;
        if raw.len() < NAMES_HEADER_SIZE as usize || le_u32(&raw[..4]) != NAMES_MAGIC {
            return Err(StoreError::corrupted(
                ErrorCategory::NameStorageIncomplete,
                "invalid names header",
            ));
        }
        let version = le_u32(&raw[4..8]);

        let ids = DashMap::new();
        let mut names = Vec::new();
        let mut pos = NAMES_HEADER_SIZE as usize;
        let mut damage = None;
        while pos < raw.len() {
            let Some(len_bytes) = raw.get(pos..pos + 4) else {
                damage = Some(format!("torn length at offset {}", pos));
                break;
            };
            let len = le_u32(len_bytes) as usize;
            let Some(bytes) = raw.get(pos + 4..pos + 4 + len) else {
                damage = Some(format!("torn name at offset {}", pos));
                break;
            };
            let Ok(text) = std::str::from_utf8(bytes) else {
                damage = Some(format!("invalid utf-8 at offset {}", pos));
                break;
            };
            let name: Arc<str> = Arc::from(text);
            names.push(name.clone());
            ids.insert(name, names.len() as u32);
            pos += 4 + len;
        }

        if let Some(reason) = &damage {
            log_store_warn!(
                "Names file has a damaged tail",
                reason = reason.as_str(),
                valid_names = names.len() as u64
            );
        }
        log_store_info!("Loaded names", count = names.len() as u64);

        Ok(Self {
            writer: Mutex::new(NameWriter {
                file,
                len: pos as u64,
            }),
            ids,
            names: RwLock::new(names),
            version: AtomicU32::new(version),
            dirty: AtomicBool::new(false),
            fresh,
            damage: Mutex::new(damage),
        })
    }

    /// Id of `name`, assigning a new one on first sight.
    pub fn intern(&self, name: &str) -> Result<u32> {
        if name.is_empty() {
            return Err(StoreError::InvalidArgument("empty name".to_string()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(StoreError::InvalidArgument(format!(
                "name of {} bytes exceeds {}",
                name.len(),
                MAX_NAME_LEN
            )));
        }
        if let Some(id) = self.ids.get(name) {
            return Ok(*id);
        }

        let mut writer = self.writer.lock();
        // Double-check under the writer lock
        if let Some(id) = self.ids.get(name) {
            return Ok(*id);
        }
        let mut entry = Vec::with_capacity(4 + name.len());
        entry.extend_from_slice(&(name.len() as u32).to_le_bytes());
        entry.extend_from_slice(name.as_bytes());
        writer.file.write_all_at(&entry, writer.len)?;
        writer.len += entry.len() as u64;

        let name: Arc<str> = Arc::from(name);
        let id = {
            let mut names = self.names.write();
            names.push(name.clone());
            names.len() as u32
        };
        self.ids.insert(name, id);
        self.dirty.store(true, Ordering::Release);
        Ok(id)
    }

    /// Id of `name` if it was ever interned.
    pub fn find(&self, name: &str) -> Option<u32> {
        self.ids.get(name).map(|id| *id)
    }

    pub fn get(&self, id: u32) -> Option<Arc<str>> {
        if id == 0 {
            return None;
        }
        self.names.read().get(id as usize - 1).cloned()
    }

    /// Name for an id read from a record; a missing entry is corruption.
    pub fn name_of(&self, id: u32) -> Result<Arc<str>> {
        self.get(id).ok_or_else(|| {
            StoreError::corrupted(
                ErrorCategory::NameStorageIncomplete,
                format!("name id {} not in storage of {}", id, self.len()),
            )
        })
    }

    pub fn len(&self) -> u32 {
        self.names.read().len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    pub fn set_version(&self, version: u32) -> Result<()> {
        let writer = self.writer.lock();
        write_header(&writer.file, version)?;
        self.version.store(version, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub fn damage(&self) -> Option<String> {
        self.damage.lock().clone()
    }

    /// Drop the damaged tail found at open.
    pub fn repair(&self) -> Result<()> {
        let writer = self.writer.lock();
        writer.file.set_len(writer.len)?;
        writer.file.sync_data()?;
        *self.damage.lock() = None;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let writer = self.writer.lock();
        if let Err(e) = writer.file.sync_data() {
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn remove_file(root: &Path) -> Result<()> {
        match std::fs::remove_file(root.join(NAMES_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

fn write_header(file: &File, version: u32) -> std::io::Result<()> {
    let mut buf = [0u8; NAMES_HEADER_SIZE as usize];
    buf[..4].copy_from_slice(&NAMES_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&version.to_le_bytes());
    file.write_all_at(&buf, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_intern_is_idempotent() {
        let temp = tempdir().unwrap();
        let names = NameStore::open(temp.path()).unwrap();
        let a = names.intern("a.txt").unwrap();
        let b = names.intern("b.txt").unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(names.intern("a.txt").unwrap(), a);
        assert_eq!(names.get(b).as_deref(), Some("b.txt"));
        assert_eq!(names.find("b.txt"), Some(b));
        assert_eq!(names.find("c.txt"), None);
        assert!(names.get(0).is_none());
    }

    #[test]
    fn test_rejects_empty_name() {
        let temp = tempdir().unwrap();
        let names = NameStore::open(temp.path()).unwrap();
        assert!(matches!(names.intern(""), Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_reopen_preserves_ids() {
        let temp = tempdir().unwrap();
        {
            let names = NameStore::open(temp.path()).unwrap();
            names.set_version(4).unwrap();
            names.intern("src").unwrap();
            names.intern("main.rs").unwrap();
            names.flush().unwrap();
        }
        let names = NameStore::open(temp.path()).unwrap();
        assert!(!names.is_fresh());
        assert_eq!(names.version(), 4);
        assert_eq!(names.find("main.rs"), Some(2));
        assert_eq!(names.intern("lib.rs").unwrap(), 3);
    }

    #[test]
    fn test_torn_tail_is_damage_then_repaired() {
        let temp = tempdir().unwrap();
        {
            let names = NameStore::open(temp.path()).unwrap();
            names.intern("kept").unwrap();
        }
        let path = temp.path().join(NAMES_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(b"short");
        std::fs::write(&path, &bytes).unwrap();

        let names = NameStore::open(temp.path()).unwrap();
        assert!(names.damage().is_some());
        assert_eq!(names.len(), 1);
        names.repair().unwrap();
        assert!(names.damage().is_none());
        assert_eq!(names.intern("next").unwrap(), 2);
        drop(names);

        let names = NameStore::open(temp.path()).unwrap();
        assert!(names.damage().is_none());
        assert_eq!(names.get(2).as_deref(), Some("next"));
    }

    #[test]
    fn test_missing_name_is_corruption() {
        let temp = tempdir().unwrap();
        let names = NameStore::open(temp.path()).unwrap();
        let err = names.name_of(5).unwrap_err();
        assert_eq!(
            err.corruption_category(),
            Some(ErrorCategory::NameStorageIncomplete)
        );
    }
}
