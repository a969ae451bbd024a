//! Record lifecycle: allocation, soft deletion and slot recycling.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use pvfs_config::{log_store_debug, log_store_error, log_store_info, log_store_warn, AllocationMode};
use tracing::instrument;

use crate::connection::Connection;
use crate::error::{ErrorCategory, Result, StoreError};
use crate::layout::{RecordFlags, SUPER_ROOT_ID};

/// Source of reusable record ids
pub trait IdAllocator: Send + Sync {
    /// A free slot from an earlier session, if one is ready now.
    fn take_recycled(&self) -> Option<u32>;

    /// Every slot still waiting for reuse; waits for a pending scan.
    fn pending(&self) -> Vec<u32>;

    /// Wait for background work to finish; false if it failed.
    fn finish(&self) -> bool;

    /// True while background work has not been collected.
    fn is_scanning(&self) -> bool;
}

/// Never reuses ids.
pub struct GrowOnlyAllocator;

impl IdAllocator for GrowOnlyAllocator {
    fn take_recycled(&self) -> Option<u32> {
        None
    }

    fn pending(&self) -> Vec<u32> {
        Vec::new()
    }

    fn finish(&self) -> bool {
        true
    }

    fn is_scanning(&self) -> bool {
        false
    }
}

/// Reuses slots marked free in earlier sessions.
///
/// The free list is computed by a background scan started at load time;
/// until it finishes, allocation simply appends. After an unclean shutdown
/// deleted slots were never purged, so nothing is recycled that session.
pub struct RecyclingAllocator {
    scan: Mutex<Option<JoinHandle<Vec<u32>>>>,
    free: Mutex<Vec<u32>>,
}

impl RecyclingAllocator {
    pub fn start(conn: Arc<Connection>) -> Self {
        if !conn.records().was_closed_properly() {
            log_store_info!("Store was not closed cleanly, deleted records are not recycled this session");
            return Self {
                scan: Mutex::new(None),
                free: Mutex::new(Vec::new()),
            };
        }
        let handle = thread::Builder::new()
            .name("pvfs-free-scan".to_string())
            .spawn(move || {
                let mut free = Vec::new();
                let scanned = conn.records().for_each(|id, record| {
                    if id != SUPER_ROOT_ID && record.is_deleted() {
                        free.push(id);
                    }
                    true
                });
                if let Err(e) = scanned {
                    log_store_warn!("Free record scan failed", error = tracing::field::display(&e));
                }
                // Popped from the back: lowest ids are reused first.
                free.reverse();
                free
            });

        let scan = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log_store_warn!("Could not start free record scan", error = tracing::field::display(&e));
                None
            }
        };
        Self {
            scan: Mutex::new(scan),
            free: Mutex::new(Vec::new()),
        }
    }

    /// Move the scan result into the free list once it is available.
    ///
    /// Returns false if the scan thread panicked; its result is lost and the
    /// session appends only.
    fn collect_scan(&self, wait: bool) -> bool {
        let mut scan = self.scan.lock();
        let ready = matches!(scan.as_ref(), Some(handle) if wait || handle.is_finished());
        if !ready {
            return true;
        }
        let Some(handle) = scan.take() else {
            return true;
        };
        match handle.join() {
            Ok(ids) => {
                log_store_debug!("Free record scan finished", free = ids.len() as u64);
                self.free.lock().extend(ids);
                true
            }
            Err(_) => false,
        }
    }
}

impl IdAllocator for RecyclingAllocator {
    fn take_recycled(&self) -> Option<u32> {
        if !self.collect_scan(false) {
            log_store_error!("Free record scan panicked");
        }
        self.free.lock().pop()
    }

    fn pending(&self) -> Vec<u32> {
        if !self.collect_scan(true) {
            log_store_error!("Free record scan panicked");
        }
        let mut ids = self.free.lock().clone();
        ids.reverse();
        ids
    }

    fn finish(&self) -> bool {
        self.collect_scan(true)
    }

    fn is_scanning(&self) -> bool {
        self.scan.lock().is_some()
    }
}

/// Creates, deletes and recycles records of one connection
pub struct RecordAccessor {
    conn: Arc<Connection>,
    allocator: Box<dyn IdAllocator>,
}

impl RecordAccessor {
    pub fn new(conn: Arc<Connection>, mode: AllocationMode) -> Self {
        let allocator: Box<dyn IdAllocator> = match mode {
            AllocationMode::Recycle => Box::new(RecyclingAllocator::start(conn.clone())),
            AllocationMode::GrowOnly => Box::new(GrowOnlyAllocator),
        };
        Self { conn, allocator }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// A blank record: a recycled slot if one is ready, else a new one.
    #[instrument(skip(self), level = "debug")]
    pub fn create_record(&self) -> Result<u32> {
        if let Some(id) = self.allocator.take_recycled() {
            self.prepare_reused(id)?;
            return Ok(id);
        }
        self.conn.records().allocate()
    }

    /// A reused slot must have been purged at the last clean close; anything
    /// else left in it is a sign the previous session crashed or misbehaved.
    fn prepare_reused(&self, id: u32) -> Result<()> {
        let records = self.conn.records();
        let record = records.record(id)?;
        if !record.is_blank() {
            let message = format!("reused record {} still holds data: {:?}", id, record);
            if records.was_closed_properly() {
                log_store_error!("Recycled record is not clean", id = id, record = tracing::field::debug(&record));
            } else {
                log_store_warn!(
                    "Recycled record is not clean after unclean shutdown",
                    id = id,
                    record = tracing::field::debug(&record)
                );
            }
            self.conn.attributes().delete_all(id)?;
            records.clean(id, RecordFlags::empty())?;
            self.conn
                .report_corruption(ErrorCategory::ReusedRecordNotClean, &message);
            return Ok(());
        }
        records.clean(id, RecordFlags::empty())
    }

    /// Soft delete: only the free flag is set. The slot keeps its data until
    /// the next clean close purges it.
    pub fn mark_deleted(&self, id: u32) -> Result<()> {
        if id == SUPER_ROOT_ID {
            return Err(StoreError::InvalidArgument("the super-root cannot be deleted".to_string()));
        }
        self.conn
            .records()
            .update_flags(id, |flags| flags | RecordFlags::FREE_RECORD)?;
        Ok(())
    }

    pub fn is_deleted(&self, id: u32) -> Result<bool> {
        Ok(self.conn.records().record(id)?.is_deleted())
    }

    /// Slots waiting for reuse in this session.
    pub fn free_records(&self) -> Vec<u32> {
        self.allocator.pending()
    }

    /// Zero every soft-deleted record and drop its attributes, keeping the
    /// free flag so the next session can recycle it. Returns the count.
    #[instrument(skip(self), level = "debug")]
    pub fn purge_deleted(&self) -> Result<usize> {
        let records = self.conn.records();
        let mut dirty = Vec::new();
        records.for_each(|id, record| {
            if id != SUPER_ROOT_ID && record.is_deleted() && !record.is_blank() {
                dirty.push(id);
            }
            true
        })?;
        for &id in &dirty {
            self.conn.attributes().delete_all(id)?;
            records.clean(id, RecordFlags::FREE_RECORD)?;
        }
        if !dirty.is_empty() {
            log_store_info!("Purged deleted records", count = dirty.len() as u64);
        }
        Ok(dirty.len())
    }

    /// Wait for the free record scan. Best effort: a failed scan is logged
    /// and leaves this session appending only.
    pub fn wait_for_free_scan(&self) {
        if !self.allocator.finish() {
            log_store_warn!("Free record scan failed, recycling disabled for this session");
        }
    }

    /// True until the free record scan has been collected.
    pub fn is_scanning(&self) -> bool {
        self.allocator.is_scanning()
    }

    pub fn shutdown(&self) {
        self.wait_for_free_scan();
    }
}
