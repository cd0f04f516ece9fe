//! Cache and rate limiter error types

use std::sync::Arc;

/// Opaque boxed error used at the producer and store boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by cache and rate limiter operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A caller-supplied argument was rejected before any I/O was attempted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The wrapped computation failed. The same error instance is shared
    /// with every caller coalesced onto that computation; the failure is
    /// never cached.
    #[error("Producer error: {0}")]
    Producer(Arc<BoxError>),

    /// The shared store failed in an operation that cannot degrade
    /// gracefully (invalidation, purging, rate limit accounting).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Waiting on an in-flight computation exceeded the configured
    /// `wait_timeout`. The computation itself keeps running.
    #[error("Timed out waiting for in-flight computation")]
    Timeout,

    /// The in-flight computation died without reporting a result.
    #[error("In-flight computation was abandoned")]
    Abandoned,
}

/// Errors from a [`SharedStore`](crate::SharedStore) backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(#[source] BoxError),
}
