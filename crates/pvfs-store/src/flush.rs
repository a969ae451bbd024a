//! Background flushing of dirty storages.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use pvfs_config::{log_flush_debug, log_flush_warn, FlushConfig, FlushStrategy};

use crate::connection::{Connection, StorageKind};
use crate::error::Result;

/// Decides what to flush on each tick
pub trait FlushPolicy: Send {
    fn tick(&mut self, conn: &Connection) -> Result<()>;
}

/// Flush everything, but only after a full quiet period.
///
/// A tick that sees writes since the previous tick, or a heavy-activity
/// hint, postpones the flush to a later tick.
pub struct PeriodicFlush {
    last_mod_count: u64,
}

impl PeriodicFlush {
    pub fn new(conn: &Connection) -> Self {
        Self {
            last_mod_count: conn.global_mod_count(),
        }
    }
}

impl FlushPolicy for PeriodicFlush {
    fn tick(&mut self, conn: &Connection) -> Result<()> {
        let current = conn.global_mod_count();
        let busy = current != self.last_mod_count;
        self.last_mod_count = current;

        if conn.dirty_storages().is_empty() {
            return Ok(());
        }
        if busy || conn.is_heavy_activity() {
            log_flush_debug!("Store busy, flush postponed", mod_count = current);
            return Ok(());
        }
        conn.force()?;
        log_flush_debug!("Periodic flush done", mod_count = current);
        Ok(())
    }
}

/// Flush a share of the dirty storages proportional to how far writer
/// activity stayed under the quota; at or over quota, nothing is flushed.
pub struct ContentionAwareFlush {
    quota: u64,
    last_mod_count: u64,
    pending: VecDeque<StorageKind>,
}

impl ContentionAwareFlush {
    pub fn new(conn: &Connection, quota: u64) -> Self {
        Self {
            quota: quota.max(1),
            last_mod_count: conn.global_mod_count(),
            pending: VecDeque::new(),
        }
    }

    /// Storages to flush this tick given `activity` writes since the last one.
    pub fn budget(&self, activity: u64) -> usize {
        if activity >= self.quota {
            return 0;
        }
        let share = (self.quota - activity) * StorageKind::ALL.len() as u64 / self.quota;
        (share as usize).max(1)
    }
}

impl FlushPolicy for ContentionAwareFlush {
    fn tick(&mut self, conn: &Connection) -> Result<()> {
        let current = conn.global_mod_count();
        let activity = current.saturating_sub(self.last_mod_count);
        self.last_mod_count = current;

        if self.pending.is_empty() {
            self.pending.extend(conn.dirty_storages());
        }
        if self.pending.is_empty() {
            return Ok(());
        }

        let budget = self.budget(activity);
        if budget == 0 {
            log_flush_debug!("Writers over quota, flush deferred", activity = activity);
            return Ok(());
        }
        for _ in 0..budget {
            let Some(kind) = self.pending.pop_front() else {
                break;
            };
            conn.flush_storage(kind)?;
            log_flush_debug!("Storage flushed", storage = tracing::field::display(kind));
        }
        Ok(())
    }
}

/// Background thread driving a [`FlushPolicy`]
pub struct Flusher {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    /// `None` when flushing is disabled in `config`.
    pub fn start(conn: Arc<Connection>, config: &FlushConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let mut policy: Box<dyn FlushPolicy> = match config.strategy {
            FlushStrategy::Periodic => Box::new(PeriodicFlush::new(&conn)),
            FlushStrategy::ContentionAware => Box::new(ContentionAwareFlush::new(&conn, config.contention_quota)),
        };
        let period = config.period();
        let (stop, stopped) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("pvfs-flusher".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !conn.is_open() {
                            continue;
                        }
                        if let Err(e) = policy.tick(&conn) {
                            log_flush_warn!("Background flush failed", error = tracing::field::display(&e));
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Some(Self {
            stop,
            handle: Some(handle),
        }))
    }

    /// Stop the thread and wait for an in-progress tick.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log_flush_warn!("Flusher thread panicked");
            }
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
