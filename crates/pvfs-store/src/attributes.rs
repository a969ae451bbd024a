//! Per-record attribute blobs.
//!
//! Attributes are opaque byte strings keyed by `(file id, attribute key)`.
//! The store keeps two reserved keys for itself: the children list of a
//! directory and the target of a symlink.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dashmap::DashMap;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use parking_lot::RwLock;
use pvfs_config::log_store_debug;

use crate::error::{Result, StoreError};

pub const ATTRIBUTES_DIR: &str = "attributes";

/// Identifies one attribute of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeKey(pub u32);

impl AttributeKey {
    /// Encoded child id list of a directory
    pub const CHILDREN: AttributeKey = AttributeKey(1);
    /// UTF-8 target of a symlink
    pub const SYMLINK_TARGET: AttributeKey = AttributeKey(2);

    /// Keys below this are reserved for the store itself
    pub const FIRST_USER_KEY: u32 = 64;

    /// Key for caller-defined attribute number `n`.
    pub fn user(n: u32) -> Result<Self> {
        n.checked_add(Self::FIRST_USER_KEY)
            .map(AttributeKey)
            .ok_or_else(|| StoreError::InvalidArgument(format!("attribute number {} too large", n)))
    }

    pub fn is_reserved(&self) -> bool {
        self.0 < Self::FIRST_USER_KEY
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            AttributeKey::CHILDREN => f.write_str("children"),
            AttributeKey::SYMLINK_TARGET => f.write_str("symlink-target"),
            AttributeKey(n) if n >= Self::FIRST_USER_KEY => write!(f, "user:{}", n - Self::FIRST_USER_KEY),
            AttributeKey(n) => write!(f, "reserved:{}", n),
        }
    }
}

/// Storage backend for attribute blobs
pub trait AttributeStore: Send + Sync {
    fn read(&self, file_id: u32, key: AttributeKey) -> Result<Option<Vec<u8>>>;

    /// Visit the stored bytes without copying them out; returns false if absent.
    fn read_with(&self, file_id: u32, key: AttributeKey, visit: &mut dyn FnMut(&[u8])) -> Result<bool>;

    fn write(&self, file_id: u32, key: AttributeKey, value: &[u8]) -> Result<()>;

    /// Returns false if nothing was stored.
    fn remove(&self, file_id: u32, key: AttributeKey) -> Result<bool>;

    /// Drop every attribute of `file_id`.
    fn delete_all(&self, file_id: u32) -> Result<()>;

    fn has(&self, file_id: u32, key: AttributeKey) -> Result<bool>;

    fn keys(&self, file_id: u32) -> Result<Vec<AttributeKey>>;

    fn version(&self) -> Result<u32>;

    fn set_version(&self, version: u32) -> Result<()>;

    fn is_fresh(&self) -> bool;

    fn is_dirty(&self) -> bool;

    fn flush(&self) -> Result<()>;

    /// Release the backend; later calls fail with [`StoreError::Closed`].
    fn close(&self) -> Result<()>;
}

/// Buffers a value and stores it on [`commit`](AttributeWriter::commit).
///
/// Dropping the writer without committing discards the value.
pub struct AttributeWriter<'a> {
    store: &'a dyn AttributeStore,
    file_id: u32,
    key: AttributeKey,
    buf: Vec<u8>,
}

impl<'a> AttributeWriter<'a> {
    pub fn new(store: &'a dyn AttributeStore, file_id: u32, key: AttributeKey) -> Self {
        Self {
            store,
            file_id,
            key,
            buf: Vec::new(),
        }
    }

    pub fn commit(self) -> Result<()> {
        self.store.write(self.file_id, self.key, &self.buf)
    }
}

impl io::Write for AttributeWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn encode_key(file_id: u32, key: AttributeKey) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[..4].copy_from_slice(&file_id.to_be_bytes());
    buf[4..].copy_from_slice(&key.0.to_be_bytes());
    buf
}

fn decode_attribute_key(raw: &[u8]) -> Option<AttributeKey> {
    let tail: [u8; 4] = raw.get(4..8)?.try_into().ok()?;
    Some(AttributeKey(u32::from_be_bytes(tail)))
}

const VERSION_KEY: &str = "version";

/// LMDB-backed attribute store.
///
/// Keys are big-endian `file_id ++ key` so all attributes of one record are
/// adjacent and can be removed with a prefix scan.
pub struct LmdbAttributeStore {
    path: PathBuf,
    env: RwLock<Option<Env>>,
    attrs: Database<Bytes, Bytes>,
    meta: Database<Str, Bytes>,
    fresh: bool,
    dirty: AtomicBool,
}

impl LmdbAttributeStore {
    /// 1 GiB map; LMDB grows the file lazily
    const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(ATTRIBUTES_DIR);
        let fresh = !path.join("data.mdb").exists();
        std::fs::create_dir_all(&path)?;

        let mut options = EnvOpenOptions::new();
        options.map_size(Self::DEFAULT_MAP_SIZE).max_dbs(2);
        // SAFETY: the environment directory is private to this store, and
        // NO_SYNC durability is restored by `flush`.
        let env = unsafe {
            options.flags(EnvFlags::NO_SYNC);
            options.open(&path)?
        };

        let mut wtxn = env.write_txn()?;
        let attrs = env.create_database(&mut wtxn, Some("attributes"))?;
        let meta = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        log_store_debug!("Opened attribute store", fresh = fresh);

        Ok(Self {
            path,
            env: RwLock::new(Some(env)),
            attrs,
            meta,
            fresh,
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_env<R>(&self, f: impl FnOnce(&Env) -> Result<R>) -> Result<R> {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(StoreError::Closed)?;
        f(env)
    }

    pub fn remove_dir(root: &Path) -> Result<()> {
        match std::fs::remove_dir_all(root.join(ATTRIBUTES_DIR)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl AttributeStore for LmdbAttributeStore {
    fn read(&self, file_id: u32, key: AttributeKey) -> Result<Option<Vec<u8>>> {
        self.with_env(|env| {
            let rtxn = env.read_txn()?;
            let value = self.attrs.get(&rtxn, &encode_key(file_id, key))?;
            Ok(value.map(|v| v.to_vec()))
        })
    }

    fn read_with(&self, file_id: u32, key: AttributeKey, visit: &mut dyn FnMut(&[u8])) -> Result<bool> {
        self.with_env(|env| {
            let rtxn = env.read_txn()?;
            match self.attrs.get(&rtxn, &encode_key(file_id, key))? {
                Some(value) => {
                    visit(value);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn write(&self, file_id: u32, key: AttributeKey, value: &[u8]) -> Result<()> {
        self.with_env(|env| {
            let mut wtxn = env.write_txn()?;
            self.attrs.put(&mut wtxn, &encode_key(file_id, key), value)?;
            wtxn.commit()?;
            self.dirty.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn remove(&self, file_id: u32, key: AttributeKey) -> Result<bool> {
        self.with_env(|env| {
            let mut wtxn = env.write_txn()?;
            let removed = self.attrs.delete(&mut wtxn, &encode_key(file_id, key))?;
            wtxn.commit()?;
            if removed {
                self.dirty.store(true, Ordering::Release);
            }
            Ok(removed)
        })
    }

    fn delete_all(&self, file_id: u32) -> Result<()> {
        self.with_env(|env| {
            let prefix = file_id.to_be_bytes();
            let mut wtxn = env.write_txn()?;
            let keys = self
                .attrs
                .prefix_iter(&wtxn, &prefix)?
                .map(|item| item.map(|(k, _)| k.to_vec()))
                .collect::<heed::Result<Vec<_>>>()?;
            for key in &keys {
                self.attrs.delete(&mut wtxn, key)?;
            }
            wtxn.commit()?;
            if !keys.is_empty() {
                self.dirty.store(true, Ordering::Release);
            }
            Ok(())
        })
    }

    fn has(&self, file_id: u32, key: AttributeKey) -> Result<bool> {
        self.read_with(file_id, key, &mut |_| {})
    }

    fn keys(&self, file_id: u32) -> Result<Vec<AttributeKey>> {
        self.with_env(|env| {
            let prefix = file_id.to_be_bytes();
            let rtxn = env.read_txn()?;
            let mut keys = Vec::new();
            for item in self.attrs.prefix_iter(&rtxn, &prefix)? {
                let (raw, _) = item?;
                keys.extend(decode_attribute_key(raw));
            }
            Ok(keys)
        })
    }

    fn version(&self) -> Result<u32> {
        self.with_env(|env| {
            let rtxn = env.read_txn()?;
            let version = self
                .meta
                .get(&rtxn, VERSION_KEY)?
                .and_then(|raw| <[u8; 4]>::try_from(raw).ok())
                .map(u32::from_le_bytes)
                .unwrap_or(0);
            Ok(version)
        })
    }

    fn set_version(&self, version: u32) -> Result<()> {
        self.with_env(|env| {
            let mut wtxn = env.write_txn()?;
            self.meta.put(&mut wtxn, VERSION_KEY, &version.to_le_bytes())?;
            wtxn.commit()?;
            self.dirty.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn is_fresh(&self) -> bool {
        self.fresh
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.with_env(|env| {
            env.force_sync().map_err(|e| {
                self.dirty.store(true, Ordering::Release);
                StoreError::from(e)
            })
        })
    }

    fn close(&self) -> Result<()> {
        let Some(env) = self.env.write().take() else {
            return Ok(());
        };
        let synced = env.force_sync();
        env.prepare_for_closing().wait();
        synced?;
        Ok(())
    }
}

/// In-memory attribute store for tests and throwaway stores
#[derive(Default)]
pub struct MemoryAttributeStore {
    values: DashMap<(u32, AttributeKey), Vec<u8>>,
    version: AtomicU32,
    dirty: AtomicBool,
    closed: AtomicBool,
}

impl MemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl AttributeStore for MemoryAttributeStore {
    fn read(&self, file_id: u32, key: AttributeKey) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.values.get(&(file_id, key)).map(|v| v.value().clone()))
    }

    fn read_with(&self, file_id: u32, key: AttributeKey, visit: &mut dyn FnMut(&[u8])) -> Result<bool> {
        self.check_open()?;
        match self.values.get(&(file_id, key)) {
            Some(value) => {
                visit(value.as_slice());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn write(&self, file_id: u32, key: AttributeKey, value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.values.insert((file_id, key), value.to_vec());
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn remove(&self, file_id: u32, key: AttributeKey) -> Result<bool> {
        self.check_open()?;
        Ok(self.values.remove(&(file_id, key)).is_some())
    }

    fn delete_all(&self, file_id: u32) -> Result<()> {
        self.check_open()?;
        self.values.retain(|(id, _), _| *id != file_id);
        Ok(())
    }

    fn has(&self, file_id: u32, key: AttributeKey) -> Result<bool> {
        self.check_open()?;
        Ok(self.values.contains_key(&(file_id, key)))
    }

    fn keys(&self, file_id: u32) -> Result<Vec<AttributeKey>> {
        self.check_open()?;
        let mut keys: Vec<_> = self
            .values
            .iter()
            .filter(|entry| entry.key().0 == file_id)
            .map(|entry| entry.key().1)
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn version(&self) -> Result<u32> {
        self.check_open()?;
        Ok(self.version.load(Ordering::Acquire))
    }

    fn set_version(&self, version: u32) -> Result<()> {
        self.check_open()?;
        self.version.store(version, Ordering::Release);
        Ok(())
    }

    fn is_fresh(&self) -> bool {
        true
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn flush(&self) -> Result<()> {
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn exercise(store: &dyn AttributeStore) {
        let user = AttributeKey::user(1).unwrap();
        assert_eq!(store.read(7, user).unwrap(), None);

        store.write(7, user, b"alpha").unwrap();
        store.write(7, AttributeKey::CHILDREN, &[1, 2]).unwrap();
        store.write(8, user, b"beta").unwrap();
        assert_eq!(store.read(7, user).unwrap().as_deref(), Some(&b"alpha"[..]));
        assert!(store.has(7, AttributeKey::CHILDREN).unwrap());
        assert_eq!(store.keys(7).unwrap(), vec![AttributeKey::CHILDREN, user]);

        let mut seen = Vec::new();
        assert!(store.read_with(8, user, &mut |v| seen.extend_from_slice(v)).unwrap());
        assert_eq!(seen, b"beta");

        store.delete_all(7).unwrap();
        assert!(store.keys(7).unwrap().is_empty());
        assert!(store.has(8, user).unwrap());

        assert!(store.remove(8, user).unwrap());
        assert!(!store.remove(8, user).unwrap());

        let mut writer = AttributeWriter::new(store, 9, user);
        writer.write_all(b"streamed ").unwrap();
        writer.write_all(b"value").unwrap();
        writer.commit().unwrap();
        assert_eq!(store.read(9, user).unwrap().as_deref(), Some(&b"streamed value"[..]));
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryAttributeStore::new());
    }

    #[test]
    fn test_lmdb_store() {
        let temp = tempdir().unwrap();
        let store = LmdbAttributeStore::open(temp.path()).unwrap();
        assert!(store.is_fresh());
        exercise(&store);
        store.close().unwrap();
    }

    #[test]
    fn test_lmdb_persists_and_closes() {
        let temp = tempdir().unwrap();
        let user = AttributeKey::user(3).unwrap();
        {
            let store = LmdbAttributeStore::open(temp.path()).unwrap();
            store.set_version(2).unwrap();
            store.write(5, user, b"kept").unwrap();
            store.flush().unwrap();
            store.close().unwrap();
            assert!(matches!(store.read(5, user), Err(StoreError::Closed)));
        }
        let store = LmdbAttributeStore::open(temp.path()).unwrap();
        assert!(!store.is_fresh());
        assert_eq!(store.version().unwrap(), 2);
        assert_eq!(store.read(5, user).unwrap().as_deref(), Some(&b"kept"[..]));
        store.close().unwrap();
    }

    #[test]
    fn test_key_display_and_reservation() {
        assert_eq!(AttributeKey::CHILDREN.to_string(), "children");
        let user = AttributeKey::user(0).unwrap();
        assert!(!user.is_reserved());
        assert!(AttributeKey::SYMLINK_TARGET.is_reserved());
        assert_eq!(user.to_string(), "user:0");
        assert!(AttributeKey::user(u32::MAX).is_err());
    }
}
