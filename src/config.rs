//! Cache configuration

use std::time::Duration;

/// Configuration for [`RequestCache`](crate::RequestCache)
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// How long a caller waits on an in-flight computation before giving
    /// up with `CacheError::Timeout`. The computation itself keeps running
    /// and still populates the cache. `None` waits indefinitely.
    pub wait_timeout: Option<Duration>,
    /// Interval of the background sweep that purges expired entries from
    /// the store. `None` disables the sweep; expired entries are then
    /// evicted lazily on access.
    pub sweep_interval: Option<Duration>,
}
