//! Lock primitives shared by the accessors.
//!
//! - [`StripedStampLocks`]: seqlock stripes keyed by record id. Readers retry
//!   optimistically and fall back to the stripe's writer mutex under contention.
//! - [`IdLocks`]: one exclusive lock per record id, used to serialize
//!   hierarchy mutations of a single parent.

use std::collections::HashMap;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Optimistic attempts before a reader takes the stripe's writer mutex
const OPTIMISTIC_RETRIES: usize = 16;

struct StampStripe {
    /// Odd while a writer is inside the stripe
    seq: AtomicU64,
    writer: Mutex<()>,
}

/// Seqlock stripes: record `id` maps to stripe `id & mask`.
pub struct StripedStampLocks {
    stripes: Box<[StampStripe]>,
    mask: usize,
}

impl StripedStampLocks {
    /// `stripes` is rounded up to a power of two.
    pub fn new(stripes: usize) -> Self {
        let count = stripes.max(1).next_power_of_two();
        let stripes = (0..count)
            .map(|_| StampStripe {
                seq: AtomicU64::new(0),
                writer: Mutex::new(()),
            })
            .collect();
        Self {
            stripes,
            mask: count - 1,
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe(&self, id: u32) -> &StampStripe {
        &self.stripes[id as usize & self.mask]
    }

    /// Exclusive write access to the stripe of `id` until the guard drops.
    pub fn write(&self, id: u32) -> StampWriteGuard<'_> {
        let stripe = self.stripe(id);
        let guard = stripe.writer.lock();
        stripe.seq.fetch_add(1, Ordering::AcqRel);
        StampWriteGuard {
            stripe,
            _guard: guard,
        }
    }

    /// Run `read` until it observes no concurrent writer on the stripe of `id`.
    ///
    /// `read` may run several times and must be free of side effects.
    pub fn read<T>(&self, id: u32, mut read: impl FnMut() -> T) -> T {
        let stripe = self.stripe(id);
        for _ in 0..OPTIMISTIC_RETRIES {
            let before = stripe.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let value = read();
            fence(Ordering::Acquire);
            if stripe.seq.load(Ordering::Relaxed) == before {
                return value;
            }
        }
        // Writers are busy: queue behind them instead of spinning.
        let _guard = stripe.writer.lock();
        read()
    }
}

/// Releases the stripe on drop, leaving its sequence even again.
pub struct StampWriteGuard<'a> {
    stripe: &'a StampStripe,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for StampWriteGuard<'_> {
    fn drop(&mut self) {
        self.stripe.seq.fetch_add(1, Ordering::Release);
    }
}

struct IdLockSegment {
    held: Mutex<HashMap<u32, ThreadId>>,
    released: Condvar,
}

/// Per-id exclusive locks, striped over a fixed number of segments.
///
/// Locks are not reentrant: taking a lock the current thread already holds
/// panics instead of deadlocking.
pub struct IdLocks {
    segments: Box<[IdLockSegment]>,
}

impl IdLocks {
    pub fn new(segments: usize) -> Self {
        let segments = (0..segments.max(1))
            .map(|_| IdLockSegment {
                held: Mutex::new(HashMap::new()),
                released: Condvar::new(),
            })
            .collect();
        Self { segments }
    }

    fn segment(&self, id: u32) -> &IdLockSegment {
        &self.segments[id as usize % self.segments.len()]
    }

    /// Block until the lock for `id` is free, then take it.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock for `id`.
    pub fn lock(&self, id: u32) -> IdLockGuard<'_> {
        let segment = self.segment(id);
        let me = thread::current().id();
        let mut held = segment.held.lock();
        loop {
            match held.get(&id).copied() {
                None => break,
                Some(owner) if owner == me => {
                    panic!("lock for record {} re-acquired by its holder", id)
                }
                Some(_) => segment.released.wait(&mut held),
            }
        }
        held.insert(id, me);
        IdLockGuard { segment, id }
    }

    /// Take both locks in id order so that two callers cannot deadlock.
    pub fn lock_pair(&self, a: u32, b: u32) -> (IdLockGuard<'_>, Option<IdLockGuard<'_>>) {
        if a == b {
            return (self.lock(a), None);
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(low);
        let second = self.lock(high);
        (first, Some(second))
    }

    pub fn try_lock(&self, id: u32) -> Option<IdLockGuard<'_>> {
        let segment = self.segment(id);
        let mut held = segment.held.lock();
        if held.contains_key(&id) {
            return None;
        }
        held.insert(id, thread::current().id());
        Some(IdLockGuard { segment, id })
    }

    pub fn is_locked(&self, id: u32) -> bool {
        self.segment(id).held.lock().contains_key(&id)
    }
}

impl Default for IdLocks {
    fn default() -> Self {
        Self::new(64)
    }
}

pub struct IdLockGuard<'a> {
    segment: &'a IdLockSegment,
    id: u32,
}

impl Drop for IdLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.segment.held.lock();
        held.remove(&self.id);
        self.segment.released.notify_all();
    }
}
