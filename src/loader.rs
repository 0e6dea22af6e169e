//! Collaborator interfaces the core consumes but does not implement.
//!
//! The pixel-decoding backend, the `CellGrid` coordinate geometry, and the
//! container adapter that exposes a cache as an image are all out of scope
//! for this crate. They are reached only through [`Loader`] and
//! [`Volatile`].

use crate::error::CacheError;

/// A value that transitions monotonically from invalid to valid, never back.
///
/// Implementers of the cache may assume this monotonicity: once
/// `is_valid()` returns `true` for a particular value, it must keep
/// returning `true` for the lifetime of that value.
pub trait Volatile: Clone + Send + Sync + 'static {
    /// Whether this value currently holds real, usable data.
    fn is_valid(&self) -> bool;
}

/// Produces values for a key, on demand.
///
/// Must be safe to call concurrently with the same key — the entry's own
/// lock (see [`crate::entry::CacheEntry`]) deduplicates concurrent loads of
/// the *same* key, but a `Loader` may still be asked to load different keys
/// from many fetcher threads at once.
pub trait Loader<K, V>: Send + Sync + 'static
where
    V: Volatile,
{
    /// Produce a fresh, invalid placeholder value for `key`.
    ///
    /// Called once, under the cache's installation lock, when an entry is
    /// first created. Must return quickly: it runs before the value is ever
    /// handed to a renderer.
    fn create_empty_value(&self, key: &K) -> V;

    /// Produce a valid value for `key`. May block or take arbitrarily long.
    ///
    /// On failure the entry remains invalid and the next request re-issues
    /// the load through the fetcher path — failures are never cached.
    fn load(&self, key: &K) -> Result<V, CacheError>;
}
