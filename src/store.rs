//! Shared key-value store seam
//!
//! The request cache and the rate limiter are both driven by the same
//! small key-value capability: get/set/delete for cached values plus an
//! atomic increment-with-expiry for quota windows. Implementations decide
//! the deployment shape:
//! - [`MemoryStore`](crate::MemoryStore): per-process, no I/O
//! - [`RedisStore`](crate::RedisStore): shared across instances
//!
//! Third-party backends plug in by implementing [`SharedStore`].

use std::time::Duration;

use crate::error::StoreError;

/// Post-increment state of a quota counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterValue {
    /// Counter value after this increment was applied
    pub count: u64,
    /// Time remaining until the counter's window expires
    pub resets_in: Duration,
}

/// Abstract key-value capability behind the cache and the rate limiter.
///
/// Values are opaque bytes. TTLs are mandatory on writes so an abandoned
/// key can never outlive its usefulness, and `get` must never return an
/// expired value.
#[async_trait::async_trait]
pub trait SharedStore: Send + Sync + 'static {
    /// Fetch the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically add `amount` to the counter at `key`.
    ///
    /// The first increment of a fresh window arms the key to expire after
    /// `ttl`; later increments within the window must not extend it. The
    /// whole read-arm-increment sequence is indivisible with respect to
    /// concurrent increments of the same key.
    async fn increment(
        &self,
        key: &str,
        amount: u64,
        ttl: Duration,
    ) -> Result<CounterValue, StoreError>;

    /// Eagerly remove expired entries, returning how many were dropped.
    ///
    /// Backends whose server expires keys autonomously return 0.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}
