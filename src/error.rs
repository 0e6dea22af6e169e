//! Error types for `volatile_cache`.

use thiserror::Error;

/// Error types surfaced by loaders and by internal consistency checks.
///
/// Interrupts and queue shutdown are *not* represented here — they are
/// modeled structurally (`Option`, `WaitOutcome`) so the type system
/// enforces "never surfaced to the caller" instead of relying on call sites
/// to ignore a variant.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("loader failed to produce a valid value: {0}")]
    LoaderFailure(String),

    #[error("invalid io time budget configuration: {0}")]
    InvalidBudget(String),
}

/// Result type alias for fallible cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
