//! A loading cache for volatile values over large multi-resolution image
//! pyramids: entries start invalid, are resolved on background fetcher
//! threads (or synchronously, or budget-permitting), and become valid
//! exactly once. Weakly reachable once collected by their caller, softly
//! reachable (and bounded-capacity strongly retained) while valid.
//!
//! The public surface is [`LoadingVolatileCache`]: construct one per
//! pyramid/dataset, hand it a [`Loader`] that knows how to produce values
//! for your key type, and call [`LoadingVolatileCache::create_if_absent`]
//! with [`CacheHints`] describing how urgently you need this particular key
//! this frame. [`LoadingVolatileCache::get`] is the read-only counterpart:
//! it applies the same hints but never creates an entry for a key it hasn't
//! seen before.

mod entry;
mod error;
mod fetchers;
mod hints;
mod io_budget;
mod io_stats;
mod loader;
mod loading_cache;
mod queue;
#[cfg(test)]
mod test_utils;
mod weak_soft_cache;

pub use entry::{CacheEntry, WaitOutcome};
pub use error::{CacheError, CacheResult};
pub use hints::{CacheHints, LoadStrategy};
pub use io_budget::IoTimeBudget;
pub use io_stats::{BudgetScope, IoStatistics, IoStatisticsRegistry};
pub use loader::{Loader, Volatile};
pub use loading_cache::{LoadingVolatileCache, LoadingVolatileCacheConfig};
pub use queue::BlockingFetchQueues;
pub use weak_soft_cache::WeakSoftCache;
