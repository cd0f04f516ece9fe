//! rcache - request caching and rate limiting
//!
//! Building blocks for services that memoize expensive async requests and
//! cap how often callers hit a resource:
//! - [`RequestCache`]: TTL-bound memoization with single-flight
//!   de-duplication (concurrent identical requests run the computation
//!   once and share its outcome)
//! - [`RateLimiter`]: fixed-window quota decisions per resource key
//! - [`SharedStore`]: the pluggable key-value capability both run on,
//!   with in-process ([`MemoryStore`]) and Redis ([`RedisStore`]) backends
//!
//! The cache treats its store as an optimization: store outages degrade
//! to recomputation, never to call failure. The limiter surfaces store
//! errors instead, so the application chooses between failing open and
//! failing closed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rcache::{MemoryStore, RateLimiter, RequestCache};
//!
//! # async fn example() -> Result<(), rcache::CacheError> {
//! let store = Arc::new(MemoryStore::new());
//! let cache: RequestCache<String> = RequestCache::new(store.clone());
//!
//! let motd = cache
//!     .get_or_compute("motd", Duration::from_secs(300), || async {
//!         Ok::<_, rcache::BoxError>("hello".to_owned())
//!     })
//!     .await?;
//! assert_eq!(*motd, "hello");
//!
//! let limiter = RateLimiter::new(store);
//! if limiter.allow("api:search", 5, Duration::from_secs(60)).await? {
//!     // proceed with the request
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod memory_store;
mod rate_limiter;
mod redis_store;
mod request_cache;
mod store;

pub use config::CacheConfig;
pub use error::{BoxError, CacheError, StoreError};
pub use memory_store::MemoryStore;
pub use rate_limiter::{Decision, RateLimiter};
pub use redis_store::RedisStore;
pub use request_cache::{Cacheable, RequestCache};
pub use store::{CounterValue, SharedStore};

// Re-export async_trait for convenience when implementing SharedStore
pub use async_trait::async_trait;
