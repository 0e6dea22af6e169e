//! Fixed-size pool of worker threads draining [`BlockingFetchQueues`].
//!
//! Rust has no daemon-thread concept, and an un-joined background thread is
//! a leak, so this pool exposes `shutdown()` plus a defensive `Drop` that
//! shuts down and joins if the caller forgot.
//!
//! Pausing is cooperative rather than preemptive: a worker notices a pause
//! deadline only right after `take()` hands it a key, before calling the
//! loader. A worker idle-blocked on an empty queue is doing no I/O and holds
//! no budget, so there is nothing to preempt there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::entry::{load_or_log, CacheEntry};
use crate::loader::Volatile;
use crate::queue::BlockingFetchQueues;
use crate::weak_soft_cache::WeakSoftCache;

/// A fixed-size pool of fetcher workers.
pub struct FetcherThreads {
    handles: Mutex<Vec<JoinHandle<()>>>,
    pause_until: Arc<Mutex<Option<Instant>>>,
    pause_condvar: Arc<Condvar>,
    shut_down: Arc<AtomicBool>,
}

impl FetcherThreads {
    /// Spawn `num_workers` threads draining `queue`, loading each entry it
    /// hands back through `table`'s loader.
    ///
    /// `queue` carries `Arc<CacheEntry<K, V>>` rather than bare keys: once a
    /// key is enqueued, nothing else necessarily keeps its entry strongly
    /// reachable (the caller that triggered the enqueue may already have
    /// returned), so the queue itself is what keeps a pending entry alive
    /// until a worker gets to it.
    pub fn new<K, V>(
        num_workers: usize,
        queue: Arc<BlockingFetchQueues<Arc<CacheEntry<K, V>>>>,
        table: Arc<WeakSoftCache<K, V>>,
    ) -> Self
    where
        K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
        V: Volatile,
    {
        let pause_until = Arc::new(Mutex::new(None));
        let pause_condvar = Arc::new(Condvar::new());
        let shut_down = Arc::new(AtomicBool::new(false));

        let handles = (0..num_workers)
            .map(|idx| {
                let queue = Arc::clone(&queue);
                let table = Arc::clone(&table);
                let pause_until = Arc::clone(&pause_until);
                let pause_condvar = Arc::clone(&pause_condvar);
                let shut_down = Arc::clone(&shut_down);

                std::thread::Builder::new()
                    .name(format!("cache-fetcher-{idx}"))
                    .spawn(move || {
                        Self::run_worker(&queue, &table, &pause_until, &pause_condvar, &shut_down)
                    })
                    .expect("failed to spawn fetcher thread")
            })
            .collect();

        Self {
            handles: Mutex::new(handles),
            pause_until,
            pause_condvar,
            shut_down,
        }
    }

    fn run_worker<K, V>(
        queue: &BlockingFetchQueues<Arc<CacheEntry<K, V>>>,
        table: &Arc<WeakSoftCache<K, V>>,
        pause_until: &Mutex<Option<Instant>>,
        pause_condvar: &Condvar,
        shut_down: &AtomicBool,
    ) where
        K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
        V: Volatile,
    {
        loop {
            let Some(entry) = queue.take() else {
                return; // queue shut down
            };
            if shut_down.load(Ordering::Acquire) {
                return;
            }

            Self::wait_out_pause(pause_until, pause_condvar);

            let _ = load_or_log(&entry, table);
        }
    }

    fn wait_out_pause(pause_until: &Mutex<Option<Instant>>, pause_condvar: &Condvar) {
        let mut guard = pause_until.lock();
        loop {
            match *guard {
                Some(deadline) if deadline > Instant::now() => {
                    let remaining = deadline - Instant::now();
                    pause_condvar.wait_for(&mut guard, remaining);
                }
                _ => return,
            }
        }
    }

    /// Pause fetchers for `ms` milliseconds, from now.
    pub fn pause_for(&self, ms: u64) {
        self.pause_until(Instant::now() + std::time::Duration::from_millis(ms));
    }

    /// Pause fetchers until the given deadline.
    pub fn pause_until(&self, deadline: Instant) {
        *self.pause_until.lock() = Some(deadline);
    }

    /// Clear any pause deadline and wake every worker waiting one out.
    pub fn wake(&self) {
        *self.pause_until.lock() = None;
        self.pause_condvar.notify_all();
    }

    /// Signal shutdown: the caller must still shut down the shared queue
    /// (the orchestrator owns that) for workers blocked in `take()` to
    /// actually observe it and exit. This method only joins.
    pub fn join(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.wake();
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for FetcherThreads {
    fn drop(&mut self) {
        self.shut_down.store(true, Ordering::Release);
        self.wake();
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}
