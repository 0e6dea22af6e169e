//! A single cache slot: a key, its current (possibly invalid) value, the
//! loader that can produce a valid value, and the frame-dedup marker.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{CacheError, CacheResult};
use crate::loader::{Loader, Volatile};
use crate::weak_soft_cache::WeakSoftCache;

/// Sentinel written to `enqueue_frame` once a value becomes valid: a valid
/// entry is never re-enqueued, no matter what frame asks.
pub const ENQUEUE_FRAME_VALID: i64 = i64::MAX;

/// Outcome of a bounded wait on an entry becoming valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The entry became valid before the deadline.
    BecameValid,
    /// The deadline elapsed, or the wait was woken spuriously, with the
    /// entry still invalid. Both are treated the same: the caller just
    /// returns whatever the entry currently holds.
    TimedOut,
}

/// Key + current value + loader + frame marker.
pub struct CacheEntry<K, V: Volatile> {
    key: K,
    value: Mutex<V>,
    /// Fast-path monotonic flag mirroring `value.is_valid()`, checked
    /// without taking `value`'s lock so a caller that only wants to know
    /// "is it loaded yet" never contends with a load in progress. Written
    /// with `Release` ordering exactly when `value` transitions to valid,
    /// and read with `Acquire`, so a thread observing `valid == true` also
    /// observes the write underneath it.
    valid: AtomicBool,
    condvar: Condvar,
    /// Guarded by the same mutex as `value` so a waiter never misses a
    /// wakeup between checking validity and starting to wait.
    wait_lock: Mutex<()>,
    loader: Arc<dyn Loader<K, V>>,
    enqueue_frame: AtomicI64,
}

impl<K, V> CacheEntry<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Volatile,
{
    /// Create a fresh, invalid entry by asking `loader` for a placeholder.
    pub fn new_invalid(key: K, loader: Arc<dyn Loader<K, V>>) -> Self {
        let placeholder = loader.create_empty_value(&key);
        debug_assert!(
            !placeholder.is_valid(),
            "Loader::create_empty_value must return an invalid placeholder"
        );
        Self {
            key,
            value: Mutex::new(placeholder),
            valid: AtomicBool::new(false),
            condvar: Condvar::new(),
            wait_lock: Mutex::new(()),
            loader,
            enqueue_frame: AtomicI64::new(-1),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Fast, lock-free (beyond the atomic load) validity check.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Snapshot of the current value. May still be invalid.
    pub fn current_value(&self) -> V {
        self.value.lock().clone()
    }

    pub fn enqueue_frame(&self) -> i64 {
        self.enqueue_frame.load(Ordering::Acquire)
    }

    pub fn set_enqueue_frame(&self, frame: i64) {
        self.enqueue_frame.store(frame, Ordering::Release);
    }

    /// Sets `enqueue_frame = current_frame` and reports whether the caller
    /// won the race to enqueue this frame, i.e. the previous value was
    /// `< current_frame`. At most one caller per frame observes `true`,
    /// which is exactly the at-most-one-enqueue-per-frame guarantee — the
    /// comparison and the store happen under a single atomic RMW so
    /// concurrent requesters never both win.
    pub fn mark_enqueued_for_frame(&self, current_frame: i64) -> bool {
        self.enqueue_frame
            .fetch_max(current_frame, Ordering::AcqRel)
            < current_frame
    }

    /// If already valid, returns immediately. Otherwise double-checks under
    /// the value lock, calls the loader, and on success assigns the value,
    /// marks `enqueue_frame` as the valid sentinel, promotes the entry to
    /// soft retention in `table`, and wakes everyone waiting on it.
    ///
    /// On loader failure the entry is left invalid and the error is
    /// returned to the *caller of this method* (fetcher loop, or the
    /// BLOCKING hint path) — it is the orchestrator's job to decide whether
    /// that propagates further or is swallowed, keeping failures from ever
    /// reaching a renderer as a hard error.
    pub fn load_if_not_valid(self: &Arc<Self>, table: &WeakSoftCache<K, V>) -> CacheResult<V> {
        if self.is_valid() {
            return Ok(self.current_value());
        }

        let mut guard = self.value.lock();
        if guard.is_valid() {
            return Ok(guard.clone());
        }

        match self.loader.load(&self.key) {
            Ok(fresh) => {
                debug_assert!(fresh.is_valid(), "Loader::load must return a valid value");
                *guard = fresh.clone();
                drop(guard);

                self.valid.store(true, Ordering::Release);
                self.enqueue_frame
                    .store(ENQUEUE_FRAME_VALID, Ordering::Release);
                table.promote_to_soft(Arc::clone(self));

                // Hold `wait_lock` only long enough to serialize with a
                // waiter's check-then-wait; the actual value write already
                // happened above.
                let _lock = self.wait_lock.lock();
                self.condvar.notify_all();

                Ok(fresh)
            }
            Err(err) => {
                drop(guard);
                Err(err)
            }
        }
    }

    /// Wait up to `timeout` for the entry to become valid. Does not itself
    /// trigger a load — the caller is expected to have already enqueued
    /// one. Returns the outcome; the caller reads `current_value()`
    /// afterwards regardless.
    pub fn wait_until_valid(&self, timeout: Duration) -> WaitOutcome {
        if self.is_valid() {
            return WaitOutcome::BecameValid;
        }
        let mut guard = self.wait_lock.lock();
        if self.is_valid() {
            return WaitOutcome::BecameValid;
        }
        let result = self.condvar.wait_for(&mut guard, timeout);
        if self.is_valid() {
            WaitOutcome::BecameValid
        } else {
            let _ = result.timed_out();
            WaitOutcome::TimedOut
        }
    }
}

/// Swallows a loader error: logs it at debug level and never surfaces it to
/// the renderer. Returns the entry's current (still invalid) value.
pub fn load_or_log<K, V>(entry: &Arc<CacheEntry<K, V>>, table: &WeakSoftCache<K, V>) -> V
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Volatile,
{
    match entry.load_if_not_valid(table) {
        Ok(value) => value,
        Err(CacheError::LoaderFailure(msg)) => {
            log::debug!("loader failed for a cache entry, leaving it invalid: {msg}");
            entry.current_value()
        }
        Err(other) => {
            log::debug!("loader error for a cache entry, leaving it invalid: {other}");
            entry.current_value()
        }
    }
}
