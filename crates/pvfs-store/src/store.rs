//! `FsRecords`: the handle the file system layer talks to.
//!
//! Every operation takes a file id handed out by [`FsRecords::create_record`]
//! or found through the roots table and children lists. Mutators hold the
//! connection's shared lock so that `force` and `close` observe a quiet store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pvfs_cas::{Blake3Hash, ContentId};
use pvfs_config::{log_store_debug, log_store_info, log_store_warn, Config};
use tracing::instrument;

use crate::accessor::RecordAccessor;
use crate::attributes::AttributeKey;
use crate::connection::{Connection, ConnectionManager};
use crate::error::{ErrorCategory, Result, StoreError};
use crate::flush::Flusher;
use crate::layout::{FileRecord, RecordField, RecordFlags, NULL_ID, SUPER_ROOT_ID};
use crate::listing::{ChildInfo, FileAttributes, ListResult};
use crate::name_index::NameIndex;
use crate::recovery::{self, CorruptionNotice};
use crate::tree::{RootEntry, TreeAccessor};

/// Flags owned by the store rather than by the caller's view of a file
const INTERNAL_FLAGS: RecordFlags = RecordFlags::CHILDREN_CACHED.union(RecordFlags::FREE_RECORD);

/// An open record store
pub struct FsRecords {
    conn: Arc<Connection>,
    accessor: Arc<RecordAccessor>,
    tree: TreeAccessor,
    name_index: Arc<NameIndex>,
    flusher: Mutex<Option<Flusher>>,
    closed: AtomicBool,
}

impl FsRecords {
    /// Connect to the store at `config.storage_root()`, rebuilding it if needed.
    #[instrument(skip(config), level = "debug")]
    pub fn open(config: &Config) -> Result<Self> {
        let conn = ConnectionManager::connect(config)?;
        let name_index = Arc::new(NameIndex::rebuild(conn.records())?);
        let accessor = Arc::new(RecordAccessor::new(conn.clone(), config.storage.allocation));
        let tree = TreeAccessor::new(accessor.clone(), name_index.clone());
        let flusher = Flusher::start(conn.clone(), &config.flush)?;

        log_store_info!(
            "Record store opened",
            records = conn.records().max_allocated_id(),
            names = conn.names().len(),
            indexed = name_index.len() as u64
        );
        Ok(Self {
            conn,
            accessor,
            tree,
            name_index,
            flusher: Mutex::new(flusher),
            closed: AtomicBool::new(false),
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn name_index(&self) -> &NameIndex {
        &self.name_index
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Run `f` under the shared lock, reporting any corruption it surfaces.
    fn write_op<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.ensure_open()?;
        let _shared = self.conn.shared();
        self.checked(f())
    }

    fn checked<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            self.handle_error(e);
        }
        result
    }

    // ---- records ----

    pub fn create_record(&self) -> Result<u32> {
        self.write_op(|| self.accessor.create_record())
    }

    /// Soft-delete a single record and unlink it from its parent.
    ///
    /// Children of `id` are left in place; use
    /// [`FsRecords::delete_record_recursively`] for directories.
    pub fn delete_record(&self, id: u32) -> Result<()> {
        self.write_op(|| {
            if id == SUPER_ROOT_ID {
                return Err(StoreError::InvalidArgument("the super-root cannot be deleted".to_string()));
            }
            self.unlink(id)?;
            self.delete_unlisted(id)
        })
    }

    /// Drop `id` from its parent's children, or from the roots table.
    ///
    /// A purged slot has no name, so a list still naming it would load as
    /// corrupted after the next clean restart.
    fn unlink(&self, id: u32) -> Result<()> {
        let parent = self.conn.records().read_field(id, RecordField::Parent)? as u32;
        if parent == SUPER_ROOT_ID {
            self.tree.delete_root(id)?;
        } else if parent != NULL_ID && self.conn.records().check_id(parent).is_ok() {
            self.tree.remove_child(parent, id)?;
        }
        Ok(())
    }

    fn delete_unlisted(&self, id: u32) -> Result<()> {
        let name_id = self.conn.records().read_field(id, RecordField::Name)? as u32;
        self.accessor.mark_deleted(id)?;
        self.name_index.update(id, name_id, NULL_ID);
        Ok(())
    }

    /// Delete `id` and everything below it, unlinking it from its parent.
    ///
    /// Returns the number of records deleted.
    #[instrument(skip(self), level = "debug")]
    pub fn delete_record_recursively(&self, id: u32) -> Result<usize> {
        self.write_op(|| {
            if id == SUPER_ROOT_ID {
                return Err(StoreError::InvalidArgument("the super-root cannot be deleted".to_string()));
            }
            self.unlink(id)?;
            let subtree = self.collect_subtree(id)?;
            for &member in &subtree {
                self.delete_unlisted(member)?;
            }
            log_store_debug!("Deleted subtree", id = id, count = subtree.len() as u64);
            Ok(subtree.len())
        })
    }

    fn collect_subtree(&self, id: u32) -> Result<Vec<u32>> {
        let max = self.conn.records().max_allocated_id() as usize;
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if out.len() > max {
                return Err(StoreError::corrupted(
                    ErrorCategory::ChildrenCorrupted,
                    format!("subtree of {} contains a cycle", id),
                ));
            }
            out.push(next);
            if self.conn.attributes().has(next, AttributeKey::CHILDREN)? {
                stack.extend(self.tree.list_ids(next)?);
            }
        }
        Ok(out)
    }

    pub fn is_deleted(&self, id: u32) -> Result<bool> {
        self.accessor.is_deleted(id)
    }

    /// Slots from earlier sessions still waiting for reuse; waits for the
    /// background scan.
    pub fn free_records(&self) -> Vec<u32> {
        self.accessor.free_records()
    }

    /// Consistent snapshot of every field of `id`.
    pub fn record(&self, id: u32) -> Result<FileRecord> {
        self.conn.records().record(id)
    }

    // ---- scalar fields ----

    fn field(&self, id: u32, field: RecordField) -> Result<u64> {
        self.conn.records().read_field(id, field)
    }

    pub fn parent(&self, id: u32) -> Result<u32> {
        Ok(self.field(id, RecordField::Parent)? as u32)
    }

    pub fn set_parent(&self, id: u32, parent: u32) -> Result<bool> {
        self.write_op(|| {
            if parent == id {
                return Err(StoreError::InvalidArgument(format!("record {} cannot be its own parent", id)));
            }
            if parent != NULL_ID {
                self.conn.records().check_id(parent)?;
            }
            self.conn.records().write_field(id, RecordField::Parent, parent as u64)
        })
    }

    pub fn name_id(&self, id: u32) -> Result<u32> {
        Ok(self.field(id, RecordField::Name)? as u32)
    }

    /// `None` for a record that was never named.
    pub fn name(&self, id: u32) -> Result<Option<Arc<str>>> {
        let name_id = self.name_id(id)?;
        if name_id == NULL_ID {
            return Ok(None);
        }
        self.checked(self.conn.names().name_of(name_id).map(Some))
    }

    /// Rename `id`, keeping the name index current.
    pub fn set_name(&self, id: u32, name: &str) -> Result<bool> {
        self.write_op(|| {
            let name_id = self.conn.names().intern(name)?;
            let _guard = self.tree.locks().lock(id);
            self.rename_locked(id, name_id)
        })
    }

    /// Callers hold the lock for `id` or own the record exclusively.
    fn rename_locked(&self, id: u32, name_id: u32) -> Result<bool> {
        let records = self.conn.records();
        let old = records.read_field(id, RecordField::Name)? as u32;
        let changed = records.write_field(id, RecordField::Name, name_id as u64)?;
        if changed {
            self.name_index.update(id, old, name_id);
        }
        Ok(changed)
    }

    pub fn flags(&self, id: u32) -> Result<RecordFlags> {
        Ok(RecordFlags::from_bits_retain(self.field(id, RecordField::Flags)? as u32))
    }

    /// Replace the caller-visible flags; store-internal bits are preserved.
    pub fn set_flags(&self, id: u32, flags: RecordFlags) -> Result<bool> {
        self.write_op(|| {
            self.conn
                .records()
                .update_flags(id, |old| (old & INTERNAL_FLAGS) | (flags - INTERNAL_FLAGS))
        })
    }

    pub fn length(&self, id: u32) -> Result<u64> {
        self.field(id, RecordField::Length)
    }

    pub fn set_length(&self, id: u32, length: u64) -> Result<bool> {
        self.write_op(|| {
            let records = self.conn.records();
            let changed = records.write_field(id, RecordField::Length, length)?;
            records.update_flags(id, |f| f - RecordFlags::MUST_RELOAD_LENGTH)?;
            Ok(changed)
        })
    }

    pub fn timestamp(&self, id: u32) -> Result<u64> {
        self.field(id, RecordField::Timestamp)
    }

    pub fn set_timestamp(&self, id: u32, timestamp: u64) -> Result<bool> {
        self.write_op(|| self.conn.records().write_field(id, RecordField::Timestamp, timestamp))
    }

    pub fn mod_count(&self, id: u32) -> Result<u64> {
        self.conn.records().mod_count(id)
    }

    pub fn global_mod_count(&self) -> u64 {
        self.conn.global_mod_count()
    }

    /// Apply a full set of stat attributes at once. Returns true if any field changed.
    pub fn write_attributes_to_record(
        &self,
        id: u32,
        parent: u32,
        attributes: &FileAttributes,
        name: &str,
    ) -> Result<bool> {
        self.write_op(|| {
            let name_id = self.conn.names().intern(name)?;
            let _guard = self.tree.locks().lock(id);
            self.apply_attributes(id, parent, attributes, name_id)
        })
    }

    fn apply_attributes(&self, id: u32, parent: u32, attributes: &FileAttributes, name_id: u32) -> Result<bool> {
        let records = self.conn.records();
        let mut changed = records.write_field(id, RecordField::Parent, parent as u64)?;
        changed |= self.rename_locked(id, name_id)?;
        changed |= records.update_flags(id, |old| (old & INTERNAL_FLAGS) | (attributes.flags - INTERNAL_FLAGS))?;
        changed |= records.write_field(id, RecordField::Length, attributes.length)?;
        changed |= records.write_field(id, RecordField::Timestamp, attributes.timestamp)?;
        Ok(changed)
    }

    // ---- content ----

    /// Store `bytes` as the content of `id` and update its length.
    #[instrument(skip(self, bytes), level = "debug", fields(len = bytes.len()))]
    pub fn write_content(&self, id: u32, bytes: &[u8]) -> Result<ContentId> {
        self.write_op(|| {
            let records = self.conn.records();
            records.check_id(id)?;
            let content_id = self.conn.contents().store(bytes)?;
            records.write_field(id, RecordField::ContentRef, content_id as u64)?;
            records.write_field(id, RecordField::Length, bytes.len() as u64)?;
            records.update_flags(id, |f| f - RecordFlags::MUST_RELOAD_CONTENT - RecordFlags::MUST_RELOAD_LENGTH)?;
            Ok(content_id)
        })
    }

    /// `None` if no content was ever stored for `id`.
    pub fn read_content(&self, id: u32) -> Result<Option<Vec<u8>>> {
        let Some(content_id) = self.content_id(id)? else {
            return Ok(None);
        };
        self.checked(self.conn.contents().read(content_id).map(Some).map_err(StoreError::from))
    }

    pub fn content_id(&self, id: u32) -> Result<Option<ContentId>> {
        let content_id = self.field(id, RecordField::ContentRef)? as u32;
        Ok((content_id != 0).then_some(content_id))
    }

    pub fn content_hash(&self, id: u32) -> Result<Option<Blake3Hash>> {
        match self.content_id(id)? {
            Some(content_id) => Ok(Some(self.conn.contents().hash_of(content_id)?)),
            None => Ok(None),
        }
    }

    // ---- attributes ----

    pub fn read_attribute(&self, id: u32, key: AttributeKey) -> Result<Option<Vec<u8>>> {
        self.conn.records().check_id(id)?;
        self.conn.attributes().read(id, key)
    }

    pub fn write_attribute(&self, id: u32, key: AttributeKey, value: &[u8]) -> Result<()> {
        if key.is_reserved() {
            return Err(StoreError::InvalidArgument(format!("attribute {} is reserved", key)));
        }
        self.write_op(|| {
            self.conn.records().check_id(id)?;
            self.conn.attributes().write(id, key, value)?;
            self.conn.records().touch(id)?;
            Ok(())
        })
    }

    pub fn has_attribute(&self, id: u32, key: AttributeKey) -> Result<bool> {
        self.conn.records().check_id(id)?;
        self.conn.attributes().has(id, key)
    }

    // ---- symlinks ----

    pub fn set_symlink_target(&self, id: u32, target: &str) -> Result<()> {
        self.write_op(|| {
            let records = self.conn.records();
            records.check_id(id)?;
            self.conn
                .attributes()
                .write(id, AttributeKey::SYMLINK_TARGET, target.as_bytes())?;
            records.update_flags(id, |f| f | RecordFlags::SYMLINK)?;
            records.touch(id)?;
            Ok(())
        })
    }

    pub fn symlink_target(&self, id: u32) -> Result<Option<String>> {
        self.conn.records().check_id(id)?;
        let Some(bytes) = self.conn.attributes().read(id, AttributeKey::SYMLINK_TARGET)? else {
            return Ok(None);
        };
        String::from_utf8(bytes).map(Some).map_err(|_| {
            let e = StoreError::corrupted(ErrorCategory::Unrecognized, format!("symlink target of {} is not UTF-8", id));
            self.handle_error(&e);
            e
        })
    }

    // ---- roots ----

    pub fn list_roots(&self) -> Result<Vec<RootEntry>> {
        self.checked(self.tree.list_roots())
    }

    /// Url of a root record.
    pub fn root_url(&self, id: u32) -> Result<Option<Arc<str>>> {
        if self.parent(id)? != SUPER_ROOT_ID {
            return Ok(None);
        }
        self.name(id)
    }

    pub fn find_root(&self, url: &str) -> Result<Option<u32>> {
        self.checked(self.tree.find_root(url))
    }

    pub fn find_or_create_root(&self, url: &str) -> Result<u32> {
        self.write_op(|| self.tree.find_or_create_root(url))
    }

    /// Unlink a root; its records stay until deleted.
    pub fn delete_root(&self, id: u32) -> Result<bool> {
        self.write_op(|| self.tree.delete_root(id))
    }

    // ---- hierarchy ----

    /// Children of `parent` with their current attributes.
    pub fn list(&self, parent: u32) -> Result<ListResult> {
        let list = self.checked(self.tree.load_children(parent))?;
        let records = self.conn.records();
        let mut children = Vec::with_capacity(list.len());
        for child in list.children() {
            let record = records.record(child.id)?;
            let flags = record.flags();
            let mut info = ChildInfo::new(child.id, child.name_id).with_attributes(FileAttributes {
                flags: flags - INTERNAL_FLAGS,
                length: record.length,
                timestamp: record.timestamp,
            });
            if flags.contains(RecordFlags::SYMLINK) {
                if let Some(target) = self.symlink_target(child.id)? {
                    info = info.with_symlink_target(target);
                }
            }
            children.push(info);
        }
        Ok(ListResult::new(list.mod_count(), children, list.is_complete()))
    }

    pub fn list_ids(&self, parent: u32) -> Result<Vec<u32>> {
        self.checked(self.tree.list_ids(parent))
    }

    /// True if `cached` no longer reflects the children of `parent`.
    pub fn is_stale(&self, parent: u32, cached: &ListResult) -> Result<bool> {
        Ok(cached.children_were_changed_since_last_list(self.mod_count(parent)?))
    }

    /// Transform the children of `parent` under its lock and persist the result.
    pub fn update_children(
        &self,
        parent: u32,
        update: impl FnOnce(&ListResult) -> Result<ListResult>,
    ) -> Result<ListResult> {
        self.write_op(|| self.tree.update_children(parent, update))
    }

    pub fn were_children_accessed(&self, parent: u32) -> Result<bool> {
        self.tree.were_children_accessed(parent)
    }

    pub fn may_have_children(&self, id: u32) -> Result<bool> {
        self.checked(self.tree.may_have_children(id))
    }

    /// The child of `parent` called `name`, created with `attributes` if missing.
    #[instrument(skip(self, attributes), level = "debug")]
    pub fn create_child(&self, parent: u32, name: &str, attributes: FileAttributes) -> Result<u32> {
        self.write_op(|| {
            let name_id = self.conn.names().intern(name)?;
            let mut created = NULL_ID;
            let list = self.tree.update_children(parent, |list| {
                if let Some(existing) = list.find_by_name(name_id) {
                    created = existing.id;
                    return Ok(list.clone());
                }
                let id = self.accessor.create_record()?;
                self.apply_attributes(id, parent, &attributes, name_id)?;
                created = id;
                Ok(list.insert(ChildInfo::new(id, name_id).with_attributes(attributes)))
            })?;
            log_store_debug!("Child ready", parent = parent, id = created, children = list.len() as u64);
            Ok(created)
        })
    }

    pub fn move_children(&self, from: u32, to: u32) -> Result<usize> {
        self.write_op(|| self.tree.move_children(from, to))
    }

    // ---- lookups ----

    pub fn files_with_name(&self, name: &str) -> Vec<u32> {
        match self.conn.names().find(name) {
            Some(name_id) => self.name_index.files_with_name(name_id),
            None => Vec::new(),
        }
    }

    /// Visit every live file carrying one of `names`; false if `visit` stopped early.
    pub fn for_each_file_with_name(&self, names: &[&str], visit: impl FnMut(u32) -> bool) -> bool {
        let name_ids: Vec<u32> = names.iter().filter_map(|n| self.conn.names().find(n)).collect();
        self.name_index.for_each_file_with_name(&name_ids, visit)
    }

    /// Full path of `id`: the root's url followed by each name below it.
    pub fn path(&self, id: u32) -> Result<String> {
        let max = self.conn.records().max_allocated_id();
        let mut segments = Vec::new();
        let mut current = id;
        let mut root_url = None;
        for _ in 0..=max {
            let record = self.conn.records().record(current)?;
            let name = match record.name_id {
                NULL_ID => Arc::from(""),
                name_id => self.checked(self.conn.names().name_of(name_id))?,
            };
            if record.parent_id == SUPER_ROOT_ID {
                root_url = Some(name);
                break;
            }
            segments.push(name);
            if record.parent_id == NULL_ID {
                break;
            }
            current = record.parent_id;
        }
        if root_url.is_none() && segments.len() > max as usize {
            let e = StoreError::corrupted(ErrorCategory::ChildrenCorrupted, format!("parent chain of {} loops", id));
            self.handle_error(&e);
            return Err(e);
        }

        let mut path = root_url.map(|u| u.trim_end_matches('/').to_string()).unwrap_or_default();
        for segment in segments.iter().rev() {
            path.push('/');
            path.push_str(segment);
        }
        Ok(path)
    }

    // ---- maintenance ----

    /// Problems found by cross-checking the live store; empty when healthy.
    pub fn check_sanity(&self) -> Result<Vec<String>> {
        let mut problems: Vec<String> = recovery::self_check(&self.conn)?
            .into_iter()
            .filter(|p| p.category != ErrorCategory::NotClosedProperly)
            .map(|p| p.to_string())
            .collect();
        problems.extend(self.name_index.check_consistency());

        let records = self.conn.records();
        let mut directories = Vec::new();
        records.for_each(|id, record| {
            if id != SUPER_ROOT_ID && !record.is_deleted() && record.flags().contains(RecordFlags::DIRECTORY) {
                directories.push(id);
            }
            true
        })?;
        for parent in directories {
            let children = match self.tree.list_ids(parent) {
                Ok(children) => children,
                Err(e) => {
                    problems.push(format!("children of {}: {}", parent, e));
                    continue;
                }
            };
            for child in children {
                let actual = records.read_field(child, RecordField::Parent)? as u32;
                if actual != parent {
                    problems.push(format!("child {} of {} points at parent {}", child, parent, actual));
                }
            }
        }
        for root in self.tree.list_roots()? {
            if records.read_field(root.id, RecordField::Parent)? as u32 != SUPER_ROOT_ID {
                problems.push(format!("root {} is not parented by the super-root", root.id));
            }
        }
        Ok(problems)
    }

    /// Report a fatal error surfaced by an operation; corruption schedules a rebuild.
    pub fn handle_error(&self, error: &StoreError) -> Option<CorruptionNotice> {
        let category = error.corruption_category()?;
        Some(self.conn.report_corruption(category, &error.to_string()))
    }

    pub fn set_heavy_activity(&self, active: bool) {
        self.conn.set_heavy_activity(active);
    }

    /// Flush every storage once the free record scan has settled.
    pub fn force(&self) -> Result<()> {
        self.ensure_open()?;
        self.accessor.wait_for_free_scan();
        self.conn.force()
    }

    /// Stop background work, purge deleted records and close the storages.
    ///
    /// If closing the storages fails the store stays usable and a later
    /// call retries.
    #[instrument(skip(self), level = "debug")]
    pub fn close(&self) -> Result<()> {
        self.close_with(|conn| conn.close())
    }

    fn close_with(&self, close_storages: impl FnOnce(&Connection) -> Result<()>) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(flusher) = self.flusher.lock().take() {
            flusher.stop();
        }
        self.accessor.shutdown();
        if let Err(e) = self.accessor.purge_deleted() {
            log_store_warn!("Could not purge deleted records", error = tracing::field::display(&e));
        }
        if let Err(e) = close_storages(&self.conn) {
            log_store_warn!("Could not close store", error = tracing::field::display(&e));
            self.closed.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }
}
