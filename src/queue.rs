//! Priority blocking queue of pending fetch requests.
//!
//! Generic over the element type; the orchestrator instantiates it with
//! `Arc<CacheEntry<K, V>>` rather than a bare key, so that once something is
//! enqueued the queue itself keeps it strongly reachable until a fetcher
//! thread dequeues it. `N` priority bands plus one *prefetch* band fed by
//! [`BlockingFetchQueues::clear_to_prefetch`].

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct Inner<K> {
    /// `bands[p]` is priority band `p`, `0` highest.
    bands: Vec<VecDeque<K>>,
    /// Swap buffer filled by `clear_to_prefetch`; consulted by `take` only
    /// when every live band is empty.
    prefetch: VecDeque<K>,
    shut_down: bool,
}

/// A priority blocking deque of pending fetch requests.
pub struct BlockingFetchQueues<K> {
    inner: Mutex<Inner<K>>,
    not_empty: Condvar,
}

impl<K: Clone> BlockingFetchQueues<K> {
    /// Create a queue with `num_priorities` live bands (`0` highest).
    pub fn new(num_priorities: usize) -> Self {
        let mut bands = Vec::with_capacity(num_priorities);
        bands.resize_with(num_priorities, VecDeque::new);
        Self {
            inner: Mutex::new(Inner {
                bands,
                prefetch: VecDeque::new(),
                shut_down: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Non-blocking. Appends `key` at the chosen end of band `priority`.
    /// Silently dropped once the queue has been shut down.
    pub fn put(&self, key: K, priority: usize, to_front: bool) {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return;
        }
        if let Some(band) = inner.bands.get_mut(priority) {
            if to_front {
                band.push_front(key);
            } else {
                band.push_back(key);
            }
            self.not_empty.notify_one();
        }
    }

    /// Blocks until a key is available, the queue is shut down, or the wait
    /// is interrupted. Returns `None` only on shutdown — callers that get
    /// spuriously woken with nothing to do should just call `take` again.
    pub fn take(&self) -> Option<K> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(key) = Self::pop_locked(&mut inner) {
                return Some(key);
            }
            if inner.shut_down {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    fn pop_locked(inner: &mut Inner<K>) -> Option<K> {
        for band in inner.bands.iter_mut() {
            if let Some(key) = band.pop_front() {
                return Some(key);
            }
        }
        inner.prefetch.pop_front()
    }

    /// Atomically drains every live band into the prefetch deque,
    /// preserving band order (highest priority first) and FIFO order within
    /// each band. New `put`s land in the live bands again and take priority
    /// over whatever remains in the prefetch deque.
    pub fn clear_to_prefetch(&self) {
        let mut inner = self.inner.lock();
        for band in inner.bands.iter_mut() {
            while let Some(key) = band.pop_front() {
                inner.prefetch.push_back(key);
            }
        }
    }

    /// Full clear: drops every live band and the prefetch deque without
    /// moving their contents anywhere. Distinct from
    /// [`clear_to_prefetch`](Self::clear_to_prefetch) — used by a cache
    /// reset, where resurrecting old requests via the prefetch fallback
    /// would be wrong.
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock();
        for band in inner.bands.iter_mut() {
            band.clear();
        }
        inner.prefetch.clear();
    }

    /// Wakes every blocked `take()` with a shutdown signal and causes
    /// subsequent `put`s to be silently dropped.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shut_down = true;
        self.not_empty.notify_all();
    }

    /// Total number of pending keys across all live bands (not including
    /// the prefetch deque). For diagnostics and tests.
    pub fn live_len(&self) -> usize {
        self.inner.lock().bands.iter().map(VecDeque::len).sum()
    }

    /// Number of keys sitting in the prefetch deque. For diagnostics and
    /// tests.
    pub fn prefetch_len(&self) -> usize {
        self.inner.lock().prefetch.len()
    }
}
