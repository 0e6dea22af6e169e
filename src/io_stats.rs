//! Per-scope I/O statistics and budget registry.
//!
//! Rust has no implicit "current thread's group" concept, so callers pass
//! an explicit [`BudgetScope`] handle instead of one being derived from
//! thread-local state. A host typically hands out one scope per
//! renderer/viewer instance.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::CacheResult;
use crate::io_budget::IoTimeBudget;

/// Caller-supplied identity standing in for "thread group" — e.g. a
/// per-renderer context id. Cheap to copy and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BudgetScope(pub u64);

/// Running I/O timer and current budget for one [`BudgetScope`].
pub struct IoStatistics {
    cumulative_io_time_ns: AtomicI64,
    /// Wall-clock instant `start()` was last called, if measurement is
    /// currently active.
    running_since: Mutex<Option<Instant>>,
    budget: Mutex<Option<IoTimeBudget>>,
}

impl IoStatistics {
    fn new() -> Self {
        Self {
            cumulative_io_time_ns: AtomicI64::new(0),
            running_since: Mutex::new(None),
            budget: Mutex::new(None),
        }
    }

    /// Begin measuring an I/O wait. No-op if already running.
    pub fn start(&self) {
        let mut running = self.running_since.lock();
        if running.is_none() {
            *running = Some(Instant::now());
        }
    }

    /// Stop measuring, folding the elapsed time into the cumulative total.
    /// No-op if not running.
    pub fn stop(&self) {
        let mut running = self.running_since.lock();
        if let Some(since) = running.take() {
            let elapsed = since.elapsed().as_nanos() as i64;
            self.cumulative_io_time_ns
                .fetch_add(elapsed, Ordering::Relaxed);
        }
    }

    /// Cumulative I/O time recorded so far, in nanoseconds.
    pub fn io_nano_time(&self) -> i64 {
        self.cumulative_io_time_ns.load(Ordering::Relaxed)
    }

    /// Run `f` against this scope's budget, initializing one sized for
    /// `max_num_levels` if none exists yet.
    pub fn with_budget<R>(&self, max_num_levels: usize, f: impl FnOnce(&mut IoTimeBudget) -> R) -> R {
        let mut guard = self.budget.lock();
        let budget = guard.get_or_insert_with(|| IoTimeBudget::new(max_num_levels));
        f(budget)
    }

    /// Read-only access to this scope's budget, if one has been initialized.
    pub fn time_left(&self, priority: u32) -> i64 {
        self.budget
            .lock()
            .as_ref()
            .map(|b| b.time_left(priority))
            .unwrap_or(0)
    }
}

/// Explicit, caller-owned registry of per-scope statistics, avoiding any
/// process-wide mutable state. Lookups are lock-free on the fast path via
/// `DashMap`'s sharded locking, matching the concurrent-table idiom used for
/// the tile table itself.
#[derive(Default)]
pub struct IoStatisticsRegistry {
    scopes: DashMap<BudgetScope, std::sync::Arc<IoStatistics>>,
}

impl IoStatisticsRegistry {
    pub fn new() -> Self {
        Self {
            scopes: DashMap::new(),
        }
    }

    /// Fetch or create the statistics record for `scope`.
    pub fn get_or_create(&self, scope: BudgetScope) -> std::sync::Arc<IoStatistics> {
        std::sync::Arc::clone(
            self.scopes
                .entry(scope)
                .or_insert_with(|| std::sync::Arc::new(IoStatistics::new()))
                .value(),
        )
    }

    /// Initialize `scope`'s budget, creating its statistics record if
    /// necessary. Fails without mutating the budget if `partial` contains a
    /// negative value.
    pub fn init_budget(&self, scope: BudgetScope, max_num_levels: usize, partial: &[i64]) -> CacheResult<()> {
        let stats = self.get_or_create(scope);
        stats.with_budget(max_num_levels, |budget| budget.reset(partial))
    }
}
