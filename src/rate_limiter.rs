//! Fixed-window rate limiting over a shared store
//!
//! Each resource key gets a counter that the store expires after the
//! window length; a request is admitted while the post-increment count
//! stays within the limit. The limiter never sleeps or queues: denial
//! is reported to the caller, who decides whether to back off or reject.
//!
//! Atomicity of the window accounting comes from
//! [`SharedStore::increment`], so the same limiter works for tasks in
//! one process and for separate processes sharing a Redis store.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::CacheError;
use crate::store::SharedStore;

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request fits in the current window.
    Allowed,
    /// The window's budget is exhausted.
    Limited {
        /// Time until the window resets and a request is admitted again.
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the request was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Per-resource fixed-window quota decisions.
///
/// Stateless apart from the store: clones share nothing but the store
/// handle, and limits are supplied per call, so one limiter serves any
/// number of resources.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    key_prefix: String,
}

impl RateLimiter {
    /// Create a limiter whose counters live under the `ratelimit:` key
    /// prefix.
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self::with_prefix(store, "ratelimit:")
    }

    /// Create a limiter with an explicit key prefix. The prefix keeps
    /// quota counters apart from cached values when both share a store.
    pub fn with_prefix(store: Arc<dyn SharedStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: prefix.into(),
        }
    }

    /// Account one request against `resource` and report the decision,
    /// including how long a denied caller should wait.
    ///
    /// The first request of a fresh window arms the window; the counter
    /// is reclaimed by store expiry after `window_length` of inactivity.
    pub async fn check(
        &self,
        resource: &str,
        limit: u64,
        window_length: Duration,
    ) -> Result<Decision, CacheError> {
        if resource.is_empty() {
            return Err(CacheError::InvalidArgument("resource must not be empty"));
        }
        if limit == 0 {
            return Err(CacheError::InvalidArgument("limit must be at least 1"));
        }
        if window_length.is_zero() {
            return Err(CacheError::InvalidArgument(
                "window length must be positive",
            ));
        }

        let key = format!("{}{}", self.key_prefix, resource);
        let counter = self.store.increment(&key, 1, window_length).await?;

        if counter.count <= limit {
            Ok(Decision::Allowed)
        } else {
            debug!(
                "Rate limit exceeded for resource {} ({} > {})",
                resource, counter.count, limit
            );
            Ok(Decision::Limited {
                retry_after: counter.resets_in,
            })
        }
    }

    /// Like [`check`](Self::check), reduced to admit-or-deny.
    pub async fn allow(
        &self,
        resource: &str,
        limit: u64,
        window_length: Duration,
    ) -> Result<bool, CacheError> {
        Ok(self.check(resource, limit, window_length).await?.is_allowed())
    }
}
