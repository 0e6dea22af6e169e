//! The public orchestrator tying the queue, the weak/soft table, and the
//! fetcher pool together behind a small hint-driven API.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::entry::{load_or_log, CacheEntry};
use crate::error::CacheResult;
use crate::fetchers::FetcherThreads;
use crate::hints::{CacheHints, LoadStrategy};
use crate::io_stats::{BudgetScope, IoStatisticsRegistry};
use crate::loader::{Loader, Volatile};
use crate::queue::BlockingFetchQueues;
use crate::weak_soft_cache::WeakSoftCache;

/// Tunables for a [`LoadingVolatileCache`], passed as a constructor argument
/// with sensible defaults rather than read from a config file or env vars.
#[derive(Debug, Clone)]
pub struct LoadingVolatileCacheConfig {
    /// Number of priority bands (and io-time-budget levels). Every
    /// [`CacheHints::priority`] must be `< max_num_levels`.
    pub max_num_levels: usize,
    /// Number of background fetcher threads.
    pub num_fetcher_threads: usize,
    /// Maximum number of valid entries kept strongly reachable in the soft
    /// tier (passed straight to `moka::sync::Cache::new`).
    pub soft_tier_capacity: u64,
    /// Upper bound on dead weak slots reclaimed per
    /// [`LoadingVolatileCache::prepare_next_frame`] call.
    pub weak_sweep_batch_hint: usize,
}

impl Default for LoadingVolatileCacheConfig {
    fn default() -> Self {
        Self {
            max_num_levels: 8,
            num_fetcher_threads: 4,
            soft_tier_capacity: 10_000,
            weak_sweep_batch_hint: 256,
        }
    }
}

/// A loading cache over volatile values, backed by a bounded pool of
/// background fetcher threads and a priority queue of pending loads.
///
/// `K` stands in for a tile/cell coordinate; `V` for the (possibly still
/// invalid) pixel data it resolves to.
pub struct LoadingVolatileCache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Volatile,
{
    table: Arc<WeakSoftCache<K, V>>,
    queue: Arc<BlockingFetchQueues<Arc<CacheEntry<K, V>>>>,
    fetchers: FetcherThreads,
    loader: Arc<dyn Loader<K, V>>,
    stats: Arc<IoStatisticsRegistry>,
    current_queue_frame: AtomicI64,
    install_lock: Mutex<()>,
    config: LoadingVolatileCacheConfig,
}

impl<K, V> LoadingVolatileCache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Volatile,
{
    pub fn new(loader: Arc<dyn Loader<K, V>>, config: LoadingVolatileCacheConfig) -> Self {
        let table = Arc::new(WeakSoftCache::new(config.soft_tier_capacity));
        let queue = Arc::new(BlockingFetchQueues::new(config.max_num_levels));
        let fetchers = FetcherThreads::new(
            config.num_fetcher_threads,
            Arc::clone(&queue),
            Arc::clone(&table),
        );
        Self {
            table,
            queue,
            fetchers,
            loader,
            stats: Arc::new(IoStatisticsRegistry::new()),
            current_queue_frame: AtomicI64::new(0),
            install_lock: Mutex::new(()),
            config,
        }
    }

    /// Looks up `key`. If no entry exists, returns `None` without creating
    /// one. If an entry exists, applies `hints` to it (possibly enqueueing
    /// or blocking) and returns its current value.
    pub fn get(&self, key: &K, hints: CacheHints, scope: BudgetScope) -> Option<V> {
        let entry = self.table.get(key)?;
        Some(self.apply_hints(&entry, hints, scope))
    }

    /// Looks up `key`, installing a fresh invalid placeholder (via this
    /// cache's loader) if none exists yet, then applies `hints` to it and
    /// returns its current value. At most one entry is ever created per key,
    /// serialized under this cache's installation lock.
    pub fn create_if_absent(&self, key: K, hints: CacheHints, scope: BudgetScope) -> V {
        let entry = self.install(key);
        self.apply_hints(&entry, hints, scope)
    }

    /// Pure peek: the cached value if an entry exists and is valid, else
    /// `None`. Never creates an entry, never enqueues, never blocks.
    pub fn get_if_cached(&self, key: &K) -> Option<V> {
        self.table
            .get(key)
            .filter(|entry| entry.is_valid())
            .map(|entry| entry.current_value())
    }

    fn install(&self, key: K) -> Arc<CacheEntry<K, V>> {
        if let Some(entry) = self.table.get(&key) {
            return entry;
        }
        // Serializes check-then-insert across racing callers so at most one
        // `CacheEntry` is ever created per key (the table's own `put_weak`
        // guards the final write, but only this lock makes the whole
        // sequence atomic).
        let _guard = self.install_lock.lock();
        if let Some(entry) = self.table.get(&key) {
            return entry;
        }
        let entry = Arc::new(CacheEntry::new_invalid(key.clone(), Arc::clone(&self.loader)));
        self.table.put_weak(key, entry)
    }

    fn apply_hints(&self, entry: &Arc<CacheEntry<K, V>>, hints: CacheHints, scope: BudgetScope) -> V {
        match hints.strategy {
            LoadStrategy::DontLoad => entry.current_value(),
            LoadStrategy::Blocking => {
                if entry.is_valid() {
                    return entry.current_value();
                }
                load_or_log(entry, &self.table)
            }
            LoadStrategy::Volatile => {
                self.enqueue_if_not_this_frame(entry, hints.priority, hints.enqueue_to_front);
                entry.current_value()
            }
            LoadStrategy::Budgeted => self.get_budgeted(entry, hints, scope),
        }
    }

    fn get_budgeted(
        &self,
        entry: &Arc<CacheEntry<K, V>>,
        hints: CacheHints,
        scope: BudgetScope,
    ) -> V {
        if entry.is_valid() {
            return entry.current_value();
        }
        let stats = self.stats.get_or_create(scope);
        let time_left = stats.time_left(hints.priority);
        self.enqueue_if_not_this_frame(entry, hints.priority, hints.enqueue_to_front);
        if time_left <= 0 {
            return entry.current_value();
        }

        // Bracket the wait with the scope's own running timer so
        // `io_nano_time` reflects real time spent waiting on I/O, then
        // charge the same measured delta against the budget.
        let before = stats.io_nano_time();
        stats.start();
        entry.wait_until_valid(Duration::from_nanos(time_left as u64));
        stats.stop();
        let elapsed_ns = stats.io_nano_time() - before;
        stats.with_budget(self.config.max_num_levels, |budget| {
            budget.r#use(elapsed_ns, hints.priority)
        });
        entry.current_value()
    }

    /// Enqueues `entry` for background loading at most once for the current
    /// frame. No-op if already valid or already enqueued this frame.
    ///
    /// The queue takes a strong clone of `entry`, not just its key: once a
    /// key is enqueued, nothing else is guaranteed to keep that entry
    /// reachable (the caller that triggered this may already have returned
    /// its own snapshot and dropped its reference), so the queue itself is
    /// what keeps a pending entry alive until a fetcher thread gets to it.
    fn enqueue_if_not_this_frame(&self, entry: &Arc<CacheEntry<K, V>>, priority: u32, to_front: bool) {
        if entry.is_valid() {
            return;
        }
        let frame = self.current_queue_frame.load(Ordering::Acquire);
        if entry.mark_enqueued_for_frame(frame) {
            self.queue.put(Arc::clone(entry), priority as usize, to_front);
        }
    }

    /// Drains last frame's un-serviced requests into the prefetch fallback,
    /// reclaims a bounded batch of dead weak slots, then advances the frame
    /// counter. The order matters: demoting to prefetch before bumping the
    /// frame ensures a fetcher that dequeues right now is still servicing
    /// last frame's request.
    pub fn prepare_next_frame(&self) {
        self.queue.clear_to_prefetch();
        self.table
            .finalize_removed_cache_entries_bounded(self.config.weak_sweep_batch_hint);
        self.current_queue_frame.fetch_add(1, Ordering::AcqRel);
    }

    /// (Re)initializes `scope`'s io time budget for the upcoming frame.
    /// Fails without changing the existing budget if any per-level value is
    /// negative.
    pub fn init_io_time_budget(
        &self,
        scope: BudgetScope,
        partial_budget_per_level: &[i64],
    ) -> CacheResult<()> {
        self.stats
            .init_budget(scope, self.config.max_num_levels, partial_budget_per_level)
    }

    /// Drops every cached entry and every pending fetch request, then
    /// advances to a fresh frame. Scoped to this cache instance only — io
    /// time budgets for other scopes are untouched. Unlike
    /// `prepare_next_frame`, this skips the weak-slot sweep: the table is
    /// already empty, so there is nothing to reclaim.
    pub fn clear(&self) {
        self.table.clear_cache();
        self.queue.clear_all();
        self.current_queue_frame.fetch_add(1, Ordering::AcqRel);
    }

    /// Shuts the queue down and joins every fetcher thread. The cache is
    /// unusable afterwards — `get`/`create_if_absent` still work but nothing
    /// enqueued will ever be serviced.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.fetchers.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CountingLoader;
    use std::time::Duration;

    fn make_cache(
        num_fetcher_threads: usize,
    ) -> LoadingVolatileCache<&'static str, crate::test_utils::TestValue> {
        let loader = Arc::new(CountingLoader::new());
        LoadingVolatileCache::new(
            loader,
            LoadingVolatileCacheConfig {
                max_num_levels: 4,
                num_fetcher_threads,
                soft_tier_capacity: 16,
                weak_sweep_batch_hint: 16,
            },
        )
    }

    #[test]
    fn get_on_absent_key_returns_none_and_creates_nothing() {
        let cache = make_cache(0);
        assert!(cache
            .get(&"k", CacheHints::blocking(0), BudgetScope(1))
            .is_none());
        assert!(cache.get_if_cached(&"k").is_none());
    }

    #[test]
    fn dont_load_never_creates_a_pending_fetch() {
        let cache = make_cache(0);
        let value = cache.create_if_absent("k", CacheHints::dont_load(0), BudgetScope(1));
        assert!(!value.is_valid());
        assert_eq!(cache.queue.live_len(), 0);
    }

    #[test]
    fn blocking_loads_synchronously() {
        let cache = make_cache(0);
        let value = cache.create_if_absent("k", CacheHints::blocking(0), BudgetScope(1));
        assert!(value.is_valid());
        assert!(cache.get_if_cached(&"k").is_some());
    }

    #[test]
    fn get_after_create_if_absent_finds_the_same_entry() {
        let cache = make_cache(0);
        cache.create_if_absent("k", CacheHints::blocking(0), BudgetScope(1));
        let value = cache.get(&"k", CacheHints::dont_load(0), BudgetScope(1));
        assert!(value.unwrap().is_valid());
    }

    #[test]
    fn volatile_enqueues_and_fetcher_resolves_it() {
        let cache = make_cache(2);
        let value = cache.create_if_absent("k", CacheHints::volatile(0), BudgetScope(1));
        assert!(!value.is_valid());

        for _ in 0..200 {
            if cache.get_if_cached(&"k").is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(cache.get_if_cached(&"k").is_some());
        cache.shutdown();
    }

    #[test]
    fn volatile_on_already_valid_entry_does_not_enqueue() {
        let cache = make_cache(0);
        cache.create_if_absent("k", CacheHints::blocking(0), BudgetScope(1));
        cache.create_if_absent("k", CacheHints::volatile(0), BudgetScope(1));
        assert_eq!(cache.queue.live_len(), 0);
    }

    #[test]
    fn volatile_enqueues_at_most_once_per_frame() {
        let cache = make_cache(0);
        cache.create_if_absent("k", CacheHints::volatile(0), BudgetScope(1));
        cache.create_if_absent("k", CacheHints::volatile(0), BudgetScope(1));
        cache.create_if_absent("k", CacheHints::volatile(0), BudgetScope(1));
        assert_eq!(cache.queue.live_len(), 1);

        cache.prepare_next_frame();
        cache.create_if_absent("k", CacheHints::volatile(0), BudgetScope(1));
        // Last frame's request was drained into prefetch by
        // `prepare_next_frame`, so the live band gets a fresh entry for the
        // new frame.
        assert_eq!(cache.queue.live_len(), 1);
    }

    #[test]
    fn budgeted_with_no_budget_just_enqueues() {
        let cache = make_cache(0);
        cache.init_io_time_budget(BudgetScope(1), &[0, 0, 0, 0]).unwrap();
        let value = cache.create_if_absent("k", CacheHints::budgeted(0), BudgetScope(1));
        assert!(!value.is_valid());
        assert_eq!(cache.queue.live_len(), 1);
    }

    #[test]
    fn budgeted_with_ample_budget_blocks_and_charges_elapsed_time() {
        let loader = Arc::new(CountingLoader::with_delay(Duration::from_millis(15)));
        let cache = LoadingVolatileCache::new(
            Arc::clone(&loader),
            LoadingVolatileCacheConfig {
                max_num_levels: 2,
                num_fetcher_threads: 1,
                soft_tier_capacity: 16,
                weak_sweep_batch_hint: 16,
            },
        );
        let scope = BudgetScope(7);
        cache
            .init_io_time_budget(scope, &[Duration::from_secs(1).as_nanos() as i64])
            .unwrap();

        let value = cache.create_if_absent("k", CacheHints::budgeted(0), scope);
        assert!(value.is_valid());

        let stats = cache.stats.get_or_create(scope);
        assert!(stats.time_left(0) < Duration::from_secs(1).as_nanos() as i64);
        // The scope's own running timer, not just the local budget ledger,
        // must reflect the time spent waiting.
        assert!(stats.io_nano_time() > 0);
        cache.shutdown();
    }

    #[test]
    fn clear_drops_cached_entries_and_pending_fetches() {
        let cache = make_cache(0);
        cache.create_if_absent("k", CacheHints::blocking(0), BudgetScope(1));
        cache.create_if_absent("other", CacheHints::volatile(0), BudgetScope(1));
        assert!(cache.get_if_cached(&"k").is_some());

        cache.clear();

        assert!(cache.get_if_cached(&"k").is_none());
        assert_eq!(cache.queue.live_len(), 0);
    }

    #[test]
    fn shutdown_lets_background_fetchers_exit_cleanly() {
        let cache = make_cache(3);
        cache.create_if_absent("k", CacheHints::volatile(0), BudgetScope(1));
        cache.shutdown();
    }
}
