//! Opening, validating and closing the set of storages behind a store.
//!
//! A connection owns four storages that must agree with each other: the
//! record table, interned names, content blobs and attributes. Opening runs
//! a version check and a self-check; anything unrecoverable wipes every
//! storage and starts over, up to a configured number of attempts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use pvfs_cas::ContentStore;
use pvfs_config::{log_recovery_warn, log_store_error, log_store_info, log_store_warn, Config};
use tracing::instrument;

use crate::attributes::{AttributeStore, LmdbAttributeStore};
use crate::error::{ErrorCategory, Result, StoreError};
use crate::layout::{RecordFlags, FORMAT_VERSION, HEADER_FLAG_CORRUPTION_DETECTED, SUPER_ROOT_ID};
use crate::names::NameStore;
use crate::records::RecordTable;
use crate::recovery::{self, CorruptionNotice, ErrorTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Initializing,
    Loaded,
    Open,
    /// Open, but a fault was seen; the store rebuilds at the next start.
    Corrupted,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Loaded => "loaded",
            ConnectionState::Open => "open",
            ConnectionState::Corrupted => "corrupted",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// The storages of one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Records,
    Names,
    Contents,
    Attributes,
}

impl StorageKind {
    /// Flush order: referenced storages before the records that point into them.
    pub const ALL: [StorageKind; 4] = [
        StorageKind::Contents,
        StorageKind::Names,
        StorageKind::Attributes,
        StorageKind::Records,
    ];
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageKind::Records => "records",
            StorageKind::Names => "names",
            StorageKind::Contents => "contents",
            StorageKind::Attributes => "attributes",
        };
        f.write_str(name)
    }
}

/// An open set of storages
pub struct Connection {
    root: PathBuf,
    records: RecordTable,
    contents: ContentStore,
    names: NameStore,
    attributes: Box<dyn AttributeStore>,
    state: Mutex<ConnectionState>,
    /// Shared by writers, exclusive for flush and close
    lifecycle: RwLock<()>,
    errors: ErrorTracker,
    heavy_activity: AtomicBool,
}

impl Connection {
    fn open_storages(root: &Path, config: &Config) -> Result<Self> {
        let records = RecordTable::open(root)?;
        let contents = ContentStore::open(root)?;
        let names = NameStore::open(root)?;
        let attributes = LmdbAttributeStore::open(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            records,
            contents,
            names,
            attributes: Box::new(attributes),
            state: Mutex::new(ConnectionState::Opening),
            lifecycle: RwLock::new(()),
            errors: ErrorTracker::new(config.errors.restart_threshold),
            heavy_activity: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn records(&self) -> &RecordTable {
        &self.records
    }

    pub fn contents(&self) -> &ContentStore {
        &self.contents
    }

    pub fn names(&self) -> &NameStore {
        &self.names
    }

    pub fn attributes(&self) -> &dyn AttributeStore {
        self.attributes.as_ref()
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), ConnectionState::Open | ConnectionState::Corrupted)
    }

    /// Writers hold this while mutating so that flush and close see a quiet store.
    pub fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.lifecycle.read()
    }

    pub fn global_mod_count(&self) -> u64 {
        self.records.global_mod_count()
    }

    /// Hint from the host that a bulk operation is running.
    pub fn set_heavy_activity(&self, active: bool) {
        self.heavy_activity.store(active, Ordering::Release);
    }

    pub fn is_heavy_activity(&self) -> bool {
        self.heavy_activity.load(Ordering::Acquire)
    }

    pub fn storage_versions(&self) -> Result<[(StorageKind, u32); 4]> {
        Ok([
            (StorageKind::Records, self.records.version()),
            (StorageKind::Names, self.names.version()),
            (StorageKind::Contents, self.contents.version()),
            (StorageKind::Attributes, self.attributes.version()?),
        ])
    }

    fn all_fresh(&self) -> bool {
        self.records.is_fresh()
            && self.names.is_fresh()
            && self.contents.is_fresh()
            && self.attributes.is_fresh()
    }

    pub fn is_dirty(&self, kind: StorageKind) -> bool {
        match kind {
            StorageKind::Records => self.records.is_dirty(),
            StorageKind::Names => self.names.is_dirty(),
            StorageKind::Contents => self.contents.is_dirty(),
            StorageKind::Attributes => self.attributes.is_dirty(),
        }
    }

    pub fn dirty_storages(&self) -> Vec<StorageKind> {
        StorageKind::ALL
            .into_iter()
            .filter(|kind| self.is_dirty(*kind))
            .collect()
    }

    fn flush_unlocked(&self, kind: StorageKind) -> Result<()> {
        match kind {
            StorageKind::Records => self.records.flush(),
            StorageKind::Names => self.names.flush(),
            StorageKind::Contents => Ok(self.contents.flush()?),
            StorageKind::Attributes => self.attributes.flush(),
        }
    }

    /// Flush one storage, waiting for in-flight writers.
    pub fn flush_storage(&self, kind: StorageKind) -> Result<()> {
        let _exclusive = self.lifecycle.write();
        self.flush_unlocked(kind)
    }

    /// Flush every storage.
    #[instrument(skip(self), level = "debug")]
    pub fn force(&self) -> Result<()> {
        let _exclusive = self.lifecycle.write();
        for kind in StorageKind::ALL {
            self.flush_unlocked(kind)?;
        }
        Ok(())
    }

    /// Count a fault, persist the count and leave a marker so the next start rebuilds.
    pub fn report_corruption(&self, category: ErrorCategory, message: &str) -> CorruptionNotice {
        let total = self.records.increment_error_count();
        self.records.set_header_flag(HEADER_FLAG_CORRUPTION_DETECTED);
        if let Err(e) = self.records.flush() {
            log_store_warn!("Could not persist error count", error = tracing::field::display(&e));
        }
        if let Err(e) = recovery::write_marker(&self.root, category, message) {
            log_store_warn!("Could not write corruption marker", error = tracing::field::display(&e));
        }
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Open {
                *state = ConnectionState::Corrupted;
            }
        }
        log_store_error!(
            "Storage corruption detected",
            category = category.as_str(),
            message = message,
            total_errors = total
        );
        self.errors.notify(category, message, total)
    }

    fn initialize(&self) -> Result<()> {
        self.set_state(ConnectionState::Initializing);
        let id = self.records.allocate()?;
        if id != SUPER_ROOT_ID {
            return Err(StoreError::corrupted(
                ErrorCategory::Unrecognized,
                format!("super-root allocated as record {}", id),
            ));
        }
        self.records.update_flags(id, |f| f | RecordFlags::DIRECTORY)?;
        self.records.set_version(FORMAT_VERSION)?;
        self.names.set_version(FORMAT_VERSION)?;
        self.contents.set_version(FORMAT_VERSION)?;
        self.attributes.set_version(FORMAT_VERSION)?;
        for kind in StorageKind::ALL {
            self.flush_unlocked(kind)?;
        }
        log_store_info!("Initialized empty store", root = tracing::field::display(self.root.display()));
        Ok(())
    }

    /// Flush, mark the records as safely closed and release the storages.
    #[instrument(skip(self), level = "debug")]
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return Ok(());
            }
            *state = ConnectionState::Closing;
        }
        let _exclusive = self.lifecycle.write();
        for kind in StorageKind::ALL {
            self.flush_unlocked(kind)?;
        }
        self.records.set_connected(false);
        self.records.flush()?;
        self.attributes.close()?;
        self.set_state(ConnectionState::Closed);
        log_store_info!("Store closed", root = tracing::field::display(self.root.display()));
        Ok(())
    }
}

/// Brings a connection up, rebuilding the store when it cannot be trusted
pub struct ConnectionManager;

impl ConnectionManager {
    /// Open the store at `config.storage_root()`.
    ///
    /// Every failed attempt leaves a corruption marker and wipes all storages;
    /// after `max_init_attempts` failures the last error is returned.
    pub fn connect(config: &Config) -> Result<Arc<Connection>> {
        let root = config.storage_root();
        let attempts = config.storage.max_init_attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::try_connect(&root, config) {
                Ok(conn) => {
                    if attempt > 1 {
                        log_store_info!("Store rebuilt", attempt = attempt);
                    }
                    return Ok(conn);
                }
                Err(e) => {
                    log_store_error!(
                        "Store initialization failed",
                        attempt = attempt,
                        error = tracing::field::display(&e)
                    );
                    let category = e.corruption_category().unwrap_or(ErrorCategory::Unrecognized);
                    if let Err(marker) = recovery::write_marker(&root, category, &e.to_string()) {
                        log_store_warn!("Could not write corruption marker", error = tracing::field::display(&marker));
                    }
                    if let Err(wipe) = Self::wipe(&root) {
                        log_store_warn!("Could not wipe storages", error = tracing::field::display(&wipe));
                    }
                    if attempt >= attempts {
                        return Err(StoreError::InitFailed {
                            attempts,
                            source: Box::new(e),
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn try_connect(root: &Path, config: &Config) -> Result<Arc<Connection>> {
        std::fs::create_dir_all(root)?;
        if let Some(reason) = recovery::read_marker(root) {
            let first_line = reason.lines().next().unwrap_or_default().to_string();
            log_recovery_warn!("Corruption marker found, rebuilding store", reason = first_line.as_str());
            Self::wipe(root)?;
        }

        let conn = Connection::open_storages(root, config)?;
        let versions = conn.storage_versions()?;
        if versions.iter().any(|(_, version)| *version != FORMAT_VERSION) {
            if !conn.all_fresh() {
                let found: Vec<String> = versions.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                return Err(StoreError::corrupted(
                    ErrorCategory::VersionMismatch,
                    format!("expected {} everywhere, found {}", FORMAT_VERSION, found.join(" ")),
                ));
            }
            conn.initialize()?;
        } else {
            conn.set_state(ConnectionState::Loaded);
            let problems = recovery::self_check(&conn)?;
            if !problems.is_empty() {
                let leftover = recovery::recover(&conn, problems, &recovery::default_recoverers())?;
                if let Some(problem) = leftover.into_iter().next() {
                    return Err(StoreError::corrupted(problem.category, problem.detail));
                }
            }
        }

        conn.records.set_connected(true);
        conn.records.flush()?;
        recovery::remove_marker(root)?;
        conn.set_state(ConnectionState::Open);
        log_store_info!(
            "Store open",
            root = tracing::field::display(root.display()),
            records = conn.records.max_allocated_id(),
            names = conn.names.len()
        );
        Ok(Arc::new(conn))
    }

    /// Delete every storage file under `root`; the marker is left alone.
    pub fn wipe(root: &Path) -> Result<()> {
        RecordTable::remove_file(root)?;
        NameStore::remove_file(root)?;
        ContentStore::remove_files(root)?;
        LmdbAttributeStore::remove_dir(root)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::CORRUPTION_MARKER_FILE;
    use pvfs_config::testing::TestEnvironment;

    #[test]
    fn test_fresh_store_gets_super_root() {
        let env = TestEnvironment::new().unwrap();
        let conn = ConnectionManager::connect(&env.config).unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.records().max_allocated_id(), 1);
        let root = conn.records().record(SUPER_ROOT_ID).unwrap();
        assert!(root.flags().contains(RecordFlags::DIRECTORY));
        for (_, version) in conn.storage_versions().unwrap() {
            assert_eq!(version, FORMAT_VERSION);
        }
        conn.close().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_clean_reopen_keeps_records() {
        let env = TestEnvironment::new().unwrap();
        {
            let conn = ConnectionManager::connect(&env.config).unwrap();
            conn.records().allocate().unwrap();
            conn.close().unwrap();
        }
        let conn = ConnectionManager::connect(&env.config).unwrap();
        assert!(conn.records().was_closed_properly());
        assert_eq!(conn.records().max_allocated_id(), 2);
        conn.close().unwrap();
    }

    #[test]
    fn test_marker_forces_rebuild() {
        let env = TestEnvironment::new().unwrap();
        {
            let conn = ConnectionManager::connect(&env.config).unwrap();
            conn.records().allocate().unwrap();
            conn.report_corruption(ErrorCategory::ChildrenCorrupted, "bad list");
            assert_eq!(conn.state(), ConnectionState::Corrupted);
            assert_eq!(conn.records().error_count(), 1);
            conn.close().unwrap();
        }
        assert!(env.file(CORRUPTION_MARKER_FILE).exists());

        let conn = ConnectionManager::connect(&env.config).unwrap();
        assert_eq!(conn.records().max_allocated_id(), 1);
        assert_eq!(conn.records().error_count(), 0);
        assert!(!env.file(CORRUPTION_MARKER_FILE).exists());
        conn.close().unwrap();
    }

    #[test]
    fn test_version_mismatch_rebuilds() {
        let env = TestEnvironment::new().unwrap();
        {
            let conn = ConnectionManager::connect(&env.config).unwrap();
            conn.records().allocate().unwrap();
            conn.names().set_version(FORMAT_VERSION + 1).unwrap();
            conn.close().unwrap();
        }
        let conn = ConnectionManager::connect(&env.config).unwrap();
        assert_eq!(conn.records().max_allocated_id(), 1);
        assert_eq!(conn.names().version(), FORMAT_VERSION);
        conn.close().unwrap();
    }

    #[test]
    fn test_force_clears_dirty_storages() {
        let env = TestEnvironment::new().unwrap();
        let conn = ConnectionManager::connect(&env.config).unwrap();
        conn.records().allocate().unwrap();
        conn.names().intern("x").unwrap();
        assert!(conn.dirty_storages().contains(&StorageKind::Records));
        conn.force().unwrap();
        assert!(conn.dirty_storages().is_empty());
        conn.close().unwrap();
    }
}
