//! Directory hierarchy: children lists and the roots table.
//!
//! A directory's children are stored as one attribute blob: a varint count
//! followed by zig-zag deltas between consecutive sorted ids, the first delta
//! taken from the parent id. The super-root's blob is the roots table instead:
//! `(url name id, root id)` pairs sorted by url id, both delta-encoded from 0.

use std::sync::Arc;

use pvfs_config::{log_store_debug, log_store_error};
use tracing::instrument;

use crate::accessor::RecordAccessor;
use crate::attributes::AttributeKey;
use crate::codec::{write_signed, write_varint, VarintReader};
use crate::connection::Connection;
use crate::error::{ErrorCategory, Result, StoreError};
use crate::layout::{RecordField, RecordFlags, NULL_ID, SUPER_ROOT_ID};
use crate::listing::{ChildInfo, ListResult};
use crate::locks::IdLocks;
use crate::name_index::NameIndex;

/// One entry of the roots table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootEntry {
    /// Name id of the root's url
    pub url_id: u32,
    pub id: u32,
}

/// Encode sorted child ids of `parent`.
///
/// A child equal to its parent is dropped with an error log.
pub fn encode_children(parent: u32, children: &[u32]) -> Vec<u8> {
    let valid: Vec<u32> = children
        .iter()
        .copied()
        .filter(|&child| {
            if child == parent {
                log_store_error!("Directory lists itself as a child", parent = parent);
                false
            } else {
                true
            }
        })
        .collect();
    debug_assert!(valid.windows(2).all(|w| w[0] < w[1]), "children must be sorted");

    let mut out = Vec::with_capacity(1 + valid.len() * 2);
    write_varint(&mut out, valid.len() as u64);
    let mut prev = parent as i64;
    for child in valid {
        write_signed(&mut out, child as i64 - prev);
        prev = child as i64;
    }
    out
}

fn children_corrupted(parent: u32, detail: impl std::fmt::Display) -> StoreError {
    StoreError::corrupted(
        ErrorCategory::ChildrenCorrupted,
        format!("children of {}: {}", parent, detail),
    )
}

/// Decode a children blob; only structural problems are detected here.
///
/// Ids must be strictly ascending.
pub fn decode_children(parent: u32, bytes: &[u8]) -> Result<Vec<u32>> {
    let mut reader = VarintReader::new(bytes);
    let count = reader
        .next_unsigned()
        .ok_or_else(|| children_corrupted(parent, "truncated count"))?;
    if count > bytes.len() as u64 {
        return Err(children_corrupted(parent, format!("count {} exceeds blob size", count)));
    }
    let mut ids = Vec::with_capacity(count as usize);
    let mut prev = parent as i64;
    for _ in 0..count {
        let delta = reader
            .next_signed()
            .ok_or_else(|| children_corrupted(parent, "truncated delta"))?;
        let id = prev
            .checked_add(delta)
            .filter(|id| (1..=u32::MAX as i64).contains(id))
            .ok_or_else(|| children_corrupted(parent, format!("id out of range after {}", prev)))?;
        if ids.last().is_some_and(|&last| id <= last as i64) {
            return Err(children_corrupted(parent, format!("id {} not above {}", id, prev)));
        }
        ids.push(id as u32);
        prev = id;
    }
    if !reader.is_exhausted() {
        return Err(children_corrupted(
            parent,
            format!("{} trailing bytes", bytes.len() - reader.position()),
        ));
    }
    Ok(ids)
}

pub fn encode_roots(roots: &[RootEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + roots.len() * 4);
    write_varint(&mut out, roots.len() as u64);
    let (mut prev_url, mut prev_id) = (0i64, 0i64);
    for root in roots {
        write_signed(&mut out, root.url_id as i64 - prev_url);
        write_signed(&mut out, root.id as i64 - prev_id);
        prev_url = root.url_id as i64;
        prev_id = root.id as i64;
    }
    out
}

pub fn decode_roots(bytes: &[u8]) -> Result<Vec<RootEntry>> {
    let bad = |detail: &str| children_corrupted(SUPER_ROOT_ID, format!("roots table: {}", detail));
    let mut reader = VarintReader::new(bytes);
    let count = reader.next_unsigned().ok_or_else(|| bad("truncated count"))?;
    if count > bytes.len() as u64 {
        return Err(bad("count exceeds blob size"));
    }
    let mut roots = Vec::with_capacity(count as usize);
    let (mut prev_url, mut prev_id) = (0i64, 0i64);
    for _ in 0..count {
        let url = reader.next_signed().and_then(|d| prev_url.checked_add(d));
        let id = reader.next_signed().and_then(|d| prev_id.checked_add(d));
        let (Some(url), Some(id)) = (url, id) else {
            return Err(bad("truncated entry"));
        };
        let in_range = |v: i64| (0..=u32::MAX as i64).contains(&v);
        if !in_range(url) || !in_range(id) {
            return Err(bad("entry out of range"));
        }
        if !roots.is_empty() && url <= prev_url {
            return Err(bad("url ids not ascending"));
        }
        roots.push(RootEntry {
            url_id: url as u32,
            id: id as u32,
        });
        prev_url = url;
        prev_id = id;
    }
    if !reader.is_exhausted() {
        return Err(bad("trailing bytes"));
    }
    Ok(roots)
}

/// Reads and writes the parent/child structure of the store
pub struct TreeAccessor {
    conn: Arc<Connection>,
    accessor: Arc<RecordAccessor>,
    name_index: Arc<NameIndex>,
    locks: IdLocks,
}

impl TreeAccessor {
    pub fn new(accessor: Arc<RecordAccessor>, name_index: Arc<NameIndex>) -> Self {
        Self {
            conn: accessor.connection().clone(),
            accessor,
            name_index,
            locks: IdLocks::default(),
        }
    }

    /// Per-directory locks serializing hierarchy mutations
    pub fn locks(&self) -> &IdLocks {
        &self.locks
    }

    fn check_directory_id(&self, parent: u32) -> Result<()> {
        if parent == SUPER_ROOT_ID {
            return Err(StoreError::InvalidArgument(
                "the super-root's children are the roots table".to_string(),
            ));
        }
        self.conn.records().check_id(parent)
    }

    /// Children of `parent` as stored. A directory never listed loads as an
    /// empty partial list.
    #[instrument(skip(self), level = "debug")]
    pub fn load_children(&self, parent: u32) -> Result<ListResult> {
        self.check_directory_id(parent)?;
        let records = self.conn.records();
        let mod_count = records.mod_count(parent)?;
        let flags = RecordFlags::from_bits_retain(records.read_field(parent, RecordField::Flags)? as u32);

        let Some(bytes) = self.conn.attributes().read(parent, AttributeKey::CHILDREN)? else {
            return Ok(ListResult::new(mod_count, Vec::new(), false));
        };
        let ids = decode_children(parent, &bytes)?;

        let max = records.max_allocated_id();
        let mut children = Vec::with_capacity(ids.len());
        for id in ids {
            if id <= SUPER_ROOT_ID || id > max {
                return Err(children_corrupted(parent, format!("child id {} outside (1, {}]", id, max)));
            }
            let name_id = records.read_field(id, RecordField::Name)? as u32;
            if name_id == NULL_ID {
                return Err(children_corrupted(parent, format!("child {} has no name", id)));
            }
            children.push(ChildInfo::new(id, name_id));
        }
        Ok(ListResult::new(
            mod_count,
            children,
            flags.contains(RecordFlags::CHILDREN_CACHED),
        ))
    }

    /// Overwrite the children of `parent` and bump its mod count.
    ///
    /// Callers hold the lock for `parent`.
    pub fn save_children(&self, parent: u32, children: &[u32]) -> Result<u64> {
        self.check_directory_id(parent)?;
        let encoded = encode_children(parent, children);
        self.conn
            .attributes()
            .write(parent, AttributeKey::CHILDREN, &encoded)?;
        self.conn.records().touch(parent)
    }

    pub fn list_ids(&self, parent: u32) -> Result<Vec<u32>> {
        if parent == SUPER_ROOT_ID {
            return Ok(self.list_roots()?.into_iter().map(|r| r.id).collect());
        }
        self.check_directory_id(parent)?;
        match self.conn.attributes().read(parent, AttributeKey::CHILDREN)? {
            Some(bytes) => decode_children(parent, &bytes),
            None => Ok(Vec::new()),
        }
    }

    /// True once a children list has been stored for `parent`.
    pub fn were_children_accessed(&self, parent: u32) -> Result<bool> {
        self.conn.records().check_id(parent)?;
        self.conn.attributes().has(parent, AttributeKey::CHILDREN)
    }

    /// False only for non-directories and directories known to be empty.
    pub fn may_have_children(&self, id: u32) -> Result<bool> {
        if id == SUPER_ROOT_ID {
            return Ok(true);
        }
        let record = self.conn.records().record(id)?;
        if !record.flags().contains(RecordFlags::DIRECTORY) {
            return Ok(false);
        }
        match self.conn.attributes().read(id, AttributeKey::CHILDREN)? {
            None => Ok(true),
            Some(bytes) => Ok(!decode_children(id, &bytes)?.is_empty()),
        }
    }

    /// Read-modify-write of `parent`'s children under its lock.
    ///
    /// `update` must not call back into hierarchy mutations of the same
    /// parent. The returned list carries the parent's new mod count.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock for `parent`.
    pub fn update_children(
        &self,
        parent: u32,
        update: impl FnOnce(&ListResult) -> Result<ListResult>,
    ) -> Result<ListResult> {
        let _guard = self.locks.lock(parent);
        let current = self.load_children(parent)?;
        let updated = update(&current)?;
        self.save_children(parent, &updated.ids())?;
        let records = self.conn.records();
        if updated.is_complete() {
            records.update_flags(parent, |f| f | RecordFlags::CHILDREN_CACHED)?;
        }
        Ok(updated.with_mod_count(records.mod_count(parent)?))
    }

    /// Unlink `child` from `parent`'s stored list under the parent's lock.
    ///
    /// Returns false, writing nothing, if `child` was not listed.
    pub fn remove_child(&self, parent: u32, child: u32) -> Result<bool> {
        let _guard = self.locks.lock(parent);
        let mut ids = self.list_ids(parent)?;
        let Ok(pos) = ids.binary_search(&child) else {
            return Ok(false);
        };
        ids.remove(pos);
        self.save_children(parent, &ids)?;
        Ok(true)
    }

    /// Reparent every child of `from` under `to`.
    #[instrument(skip(self), level = "debug")]
    pub fn move_children(&self, from: u32, to: u32) -> Result<usize> {
        if from == to {
            return Ok(0);
        }
        self.check_directory_id(from)?;
        self.check_directory_id(to)?;
        let (_first, _second) = self.locks.lock_pair(from, to);

        let moved = self.load_children(from)?;
        if moved.is_empty() {
            return Ok(0);
        }
        let records = self.conn.records();
        for child in moved.children() {
            records.write_field(child.id, RecordField::Parent, to as u64)?;
        }
        let target = self.load_children(to)?;
        let mut ids = target.ids();
        ids.extend(moved.ids());
        ids.sort_unstable();
        ids.dedup();
        self.save_children(to, &ids)?;
        self.save_children(from, &[])?;
        log_store_debug!("Moved children", from = from, to = to, count = moved.len() as u64);
        Ok(moved.len())
    }

    /// The roots table, validated against the record and name storages.
    pub fn list_roots(&self) -> Result<Vec<RootEntry>> {
        let Some(bytes) = self.conn.attributes().read(SUPER_ROOT_ID, AttributeKey::CHILDREN)? else {
            return Ok(Vec::new());
        };
        let roots = decode_roots(&bytes)?;
        let max = self.conn.records().max_allocated_id();
        let names = self.conn.names().len();
        for root in &roots {
            if root.id <= SUPER_ROOT_ID || root.id > max {
                return Err(children_corrupted(SUPER_ROOT_ID, format!("root id {} outside (1, {}]", root.id, max)));
            }
            if root.url_id == NULL_ID || root.url_id > names {
                return Err(StoreError::corrupted(
                    ErrorCategory::NameStorageIncomplete,
                    format!("root {} has url id {} of {}", root.id, root.url_id, names),
                ));
            }
        }
        Ok(roots)
    }

    fn save_roots(&self, roots: &[RootEntry]) -> Result<()> {
        self.conn
            .attributes()
            .write(SUPER_ROOT_ID, AttributeKey::CHILDREN, &encode_roots(roots))?;
        self.conn.records().touch(SUPER_ROOT_ID)?;
        Ok(())
    }

    pub fn find_root(&self, url: &str) -> Result<Option<u32>> {
        let Some(url_id) = self.conn.names().find(url) else {
            return Ok(None);
        };
        let roots = self.list_roots()?;
        Ok(roots
            .binary_search_by_key(&url_id, |r| r.url_id)
            .ok()
            .map(|i| roots[i].id))
    }

    /// Root record for `url`, created on first request.
    #[instrument(skip(self), level = "debug")]
    pub fn find_or_create_root(&self, url: &str) -> Result<u32> {
        let url_id = self.conn.names().intern(url)?;
        let _guard = self.locks.lock(SUPER_ROOT_ID);
        let mut roots = self.list_roots()?;
        let slot = match roots.binary_search_by_key(&url_id, |r| r.url_id) {
            Ok(i) => return Ok(roots[i].id),
            Err(i) => i,
        };

        let id = self.accessor.create_record()?;
        let records = self.conn.records();
        records.write_field(id, RecordField::Parent, SUPER_ROOT_ID as u64)?;
        records.write_field(id, RecordField::Name, url_id as u64)?;
        records.update_flags(id, |f| f | RecordFlags::DIRECTORY)?;
        self.name_index.update(id, NULL_ID, url_id);

        roots.insert(slot, RootEntry { url_id, id });
        self.save_roots(&roots)?;
        log_store_debug!("Created root", id = id, url = url);
        Ok(id)
    }

    /// Drop `id` from the roots table; the record itself is untouched.
    pub fn delete_root(&self, id: u32) -> Result<bool> {
        let _guard = self.locks.lock(SUPER_ROOT_ID);
        let mut roots = self.list_roots()?;
        let before = roots.len();
        roots.retain(|r| r.id != id);
        if roots.len() == before {
            return Ok(false);
        }
        self.save_roots(&roots)?;
        Ok(true)
    }
}
