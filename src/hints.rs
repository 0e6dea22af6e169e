//! Per-request loading hints.
//!
//! Hints are passed with every `get`/`createIfAbsent` call; they are never
//! stored on the entry itself.

/// How a request should be satisfied if the entry is not yet valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Enqueue for background loading at most once per frame; never block.
    Volatile,
    /// Block the caller until the entry becomes valid.
    Blocking,
    /// Consult the calling scope's io time budget to decide between a
    /// bounded wait and a plain enqueue.
    Budgeted,
    /// Never enqueue, never wait, never promote. A pure "peek."
    DontLoad,
}

/// Loading strategy, priority, and enqueue-order hints for one request.
#[derive(Debug, Clone, Copy)]
pub struct CacheHints {
    pub strategy: LoadStrategy,
    /// Priority band, `0` highest. Must be `< max_num_levels` of the owning
    /// cache's configuration.
    pub priority: u32,
    /// Within a priority band, whether to push to the front of the deque
    /// (serviced next) instead of the back (serviced last).
    pub enqueue_to_front: bool,
}

impl CacheHints {
    pub fn new(strategy: LoadStrategy, priority: u32, enqueue_to_front: bool) -> Self {
        Self {
            strategy,
            priority,
            enqueue_to_front,
        }
    }

    /// Convenience constructor for the common "background load, don't block"
    /// case.
    pub fn volatile(priority: u32) -> Self {
        Self::new(LoadStrategy::Volatile, priority, false)
    }

    /// Convenience constructor for a hard synchronous load.
    pub fn blocking(priority: u32) -> Self {
        Self::new(LoadStrategy::Blocking, priority, false)
    }

    /// Convenience constructor for a budget-aware load.
    pub fn budgeted(priority: u32) -> Self {
        Self::new(LoadStrategy::Budgeted, priority, false)
    }

    /// Convenience constructor for a pure cache peek.
    pub fn dont_load(priority: u32) -> Self {
        Self::new(LoadStrategy::DontLoad, priority, false)
    }
}
