//! Global key→entry table with soft retention for valid entries and weak
//! retention for invalid ones.
//!
//! Rust's `Arc`/`Weak` give genuine weak references without a garbage
//! collector, which this two-tier scheme uses directly:
//!
//! - a *secondary* map (`DashMap<K, Weak<CacheEntry<K, V>>>`) is the table
//!   of record for lookups, populated for every entry regardless of
//!   validity;
//! - a *primary* map (`moka::sync::Cache<K, Arc<CacheEntry<K, V>>>`, bounded
//!   by capacity) holds one strong clone for every entry currently in
//!   *soft* retention — i.e. valid. When moka evicts under capacity
//!   pressure that strong clone, the entry demotes from soft to weak: it
//!   survives only if some other strong reference (e.g. a caller's
//!   in-flight return value) is still outstanding. Moka only ever holds
//!   valid entries, so this demotion can never resurrect an invalid value.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use moka::sync::Cache;

use crate::entry::CacheEntry;
use crate::loader::Volatile;

/// Key→entry table, soft-retaining valid entries up to `capacity` and
/// weak-retaining everything else.
pub struct WeakSoftCache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Volatile,
{
    weak: DashMap<K, Weak<CacheEntry<K, V>>>,
    soft: Cache<K, Arc<CacheEntry<K, V>>>,
}

impl<K, V> WeakSoftCache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Volatile,
{
    /// `capacity` bounds the number of *valid* entries kept strongly
    /// reachable (soft tier); it has no effect on invalid entries, which
    /// are only ever weakly reachable.
    pub fn new(capacity: u64) -> Self {
        Self {
            weak: DashMap::new(),
            soft: Cache::new(capacity),
        }
    }

    /// Returns the entry for `key` if it is reachable — either softly (an
    /// `Arc` clone handed straight back) or weakly (upgraded from the
    /// secondary map).
    pub fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        if let Some(entry) = self.soft.get(key) {
            return Some(entry);
        }
        self.weak.get(key).and_then(|w| w.upgrade())
    }

    /// Installs a freshly created, invalid entry weakly. No-op (returns the
    /// existing entry) if one already exists for this key — callers must
    /// still hold their own installation lock to make the overall
    /// check-then-install atomic; this method alone does not guarantee
    /// at-most-one-entry-per-key across concurrent callers, only that it
    /// never clobbers an existing slot.
    pub fn put_weak(&self, key: K, entry: Arc<CacheEntry<K, V>>) -> Arc<CacheEntry<K, V>> {
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        self.weak.insert(key, Arc::downgrade(&entry));
        entry
    }

    /// Promotes `entry` to soft retention: always (re)registers it in the
    /// weak table too, so this is safe to call even if the entry was never
    /// installed via `put_weak` first.
    pub fn promote_to_soft(&self, entry: Arc<CacheEntry<K, V>>) {
        let key = entry.key().clone();
        self.weak.insert(key.clone(), Arc::downgrade(&entry));
        self.soft.insert(key, entry);
    }

    /// Drains weak slots whose reference has been cleared (no strong
    /// reference survives, whether because the soft tier evicted it and no
    /// caller is holding a clone, or because it was never promoted). Removes
    /// a slot only if its *current* binding is the cleared reference, so a
    /// key that was reinstalled in between keeps its fresh entry.
    pub fn finalize_removed_cache_entries(&self) {
        self.weak.retain(|_, weak| weak.upgrade().is_some());
    }

    /// Like [`finalize_removed_cache_entries`](Self::finalize_removed_cache_entries),
    /// but removes at most `max_removals` dead slots per call. Called once
    /// per frame from a caller with its own per-frame time budget to spend,
    /// so a table holding a long-idle backlog of dead slots doesn't turn one
    /// frame's sweep into a full-table scan-and-remove.
    pub fn finalize_removed_cache_entries_bounded(&self, max_removals: usize) {
        if max_removals == 0 {
            return;
        }
        let mut removed = 0usize;
        let dead: Vec<K> = self
            .weak
            .iter()
            .filter(|entry| entry.value().upgrade().is_none())
            .take(max_removals)
            .map(|entry| entry.key().clone())
            .collect();
        for key in dead {
            // Re-check under the shard lock: the slot may have been
            // reinstalled since the scan above.
            if let dashmap::mapref::entry::Entry::Occupied(occupied) = self.weak.entry(key) {
                if occupied.get().upgrade().is_none() {
                    occupied.remove();
                    removed += 1;
                }
            }
            if removed >= max_removals {
                break;
            }
        }
    }

    /// Drops every entry from both tiers.
    pub fn clear_cache(&self) {
        self.soft.invalidate_all();
        self.soft.run_pending_tasks();
        self.weak.clear();
    }

    /// Number of entries currently in the weak table (valid + invalid,
    /// upgradeable or not). For diagnostics and tests.
    pub fn weak_len(&self) -> usize {
        self.weak.len()
    }

    /// Number of entries currently strongly retained in the soft tier. For
    /// diagnostics and tests.
    pub fn soft_len(&self) -> u64 {
        self.soft.run_pending_tasks();
        self.soft.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CountingLoader;
    use std::sync::Arc;

    fn new_entry(key: &'static str) -> Arc<CacheEntry<&'static str, crate::test_utils::TestValue>> {
        Arc::new(CacheEntry::new_invalid(key, Arc::new(CountingLoader::new())))
    }

    #[test]
    fn put_weak_then_get_finds_invalid_entry() {
        let table = WeakSoftCache::new(16);
        let entry = new_entry("k");
        table.put_weak("k", Arc::clone(&entry));

        let found = table.get(&"k").unwrap();
        assert!(Arc::ptr_eq(&found, &entry));
    }

    #[test]
    fn put_weak_does_not_clobber_existing_slot() {
        let table = WeakSoftCache::new(16);
        let first = new_entry("k");
        let second = new_entry("k");

        let installed = table.put_weak("k", Arc::clone(&first));
        let installed_again = table.put_weak("k", Arc::clone(&second));

        assert!(Arc::ptr_eq(&installed, &first));
        assert!(Arc::ptr_eq(&installed_again, &first));
    }

    #[test]
    fn weak_entry_is_collected_once_no_strong_ref_remains() {
        let table = WeakSoftCache::new(16);
        let entry = new_entry("k");
        table.put_weak("k", Arc::clone(&entry));
        drop(entry);

        // Nothing else holds a strong ref — the weak slot should no longer
        // upgrade, and finalize should remove it.
        assert!(table.get(&"k").is_none());
        table.finalize_removed_cache_entries();
        assert_eq!(table.weak_len(), 0);
    }

    #[test]
    fn promote_to_soft_keeps_entry_strongly_reachable() {
        let table = WeakSoftCache::new(16);
        let entry = new_entry("k");
        table.put_weak("k", Arc::clone(&entry));
        table.promote_to_soft(Arc::clone(&entry));
        drop(entry);

        // Soft tier itself holds a strong reference now.
        assert!(table.get(&"k").is_some());
    }

    #[test]
    fn clear_cache_drops_everything() {
        let table = WeakSoftCache::new(16);
        let entry = new_entry("k");
        table.put_weak("k", Arc::clone(&entry));
        table.promote_to_soft(Arc::clone(&entry));

        table.clear_cache();

        assert!(table.get(&"k").is_none());
        assert_eq!(table.weak_len(), 0);
    }

    #[test]
    fn finalize_does_not_remove_a_key_that_was_reinstalled() {
        let table = WeakSoftCache::new(16);
        let first = new_entry("k");
        table.put_weak("k", Arc::clone(&first));
        drop(first);
        // Simulate reinstallation under a fresh createIfAbsent before the
        // sweep runs: the old weak slot is gone, a new one exists.
        let second = new_entry("k");
        table.weak.insert("k", Arc::downgrade(&second));

        table.finalize_removed_cache_entries();

        let found = table.get(&"k").unwrap();
        assert!(Arc::ptr_eq(&found, &second));
    }

    #[test]
    fn bounded_finalize_respects_max_removals() {
        let table = WeakSoftCache::new(16);
        for key in ["a", "b", "c"] {
            let entry = new_entry(key);
            table.put_weak(key, Arc::clone(&entry));
            drop(entry);
        }
        assert_eq!(table.weak_len(), 3);

        table.finalize_removed_cache_entries_bounded(2);
        assert_eq!(table.weak_len(), 1);

        table.finalize_removed_cache_entries_bounded(10);
        assert_eq!(table.weak_len(), 0);
    }
}
