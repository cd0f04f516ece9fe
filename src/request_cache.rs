//! Request cache with single-flight de-duplication
//!
//! Memoizes the results of async computations under caller-chosen string
//! keys, bounded by a per-call TTL:
//! - Concurrent calls for the same key run the computation once and all
//!   observe the same outcome (request coalescing)
//! - Values live in a pluggable [`SharedStore`], so the same cache code
//!   serves one process or many
//! - Store outages degrade to recomputation, never to call failure
//! - Failed computations are never cached; the next call retries
//!
//! The computation runs as a detached task, so cancelling a caller
//! (including the one that started it) never cancels the shared work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::config::CacheConfig;
use crate::error::{BoxError, CacheError};
use crate::store::SharedStore;

/// Trait for values the cache can hold
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {}
impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Outcome fanned out to every caller coalesced onto one computation
enum Outcome<V> {
    Value(Arc<V>),
    Producer(Arc<BoxError>),
    Abandoned,
}

// Manual impl so `V: Clone` is not required.
impl<V> Clone for Outcome<V> {
    fn clone(&self) -> Self {
        match self {
            Outcome::Value(value) => Outcome::Value(Arc::clone(value)),
            Outcome::Producer(e) => Outcome::Producer(Arc::clone(e)),
            Outcome::Abandoned => Outcome::Abandoned,
        }
    }
}

/// Represents an in-flight computation that other callers can wait on
type InFlightRx<V> = watch::Receiver<Option<Outcome<V>>>;
type InFlightTx<V> = watch::Sender<Option<Outcome<V>>>;

/// What a caller holds after consulting the in-flight table
enum Claim<V> {
    /// Another caller owns the computation; wait on its channel.
    Wait(InFlightRx<V>),
    /// This caller owns the computation.
    Run(InFlightGuard<V>),
}

/// Guard that settles an in-flight computation exactly once.
///
/// When dropped without `complete`, waiters are released with `Abandoned`
/// and the in-flight entry is unregistered, so a panicking producer can
/// never leave callers hanging.
struct InFlightGuard<V> {
    key: String,
    in_flight: Arc<DashMap<String, InFlightRx<V>>>,
    tx: Option<InFlightTx<V>>,
    rx: InFlightRx<V>,
}

impl<V> InFlightGuard<V> {
    fn new(
        key: String,
        in_flight: Arc<DashMap<String, InFlightRx<V>>>,
        tx: InFlightTx<V>,
        rx: InFlightRx<V>,
    ) -> Self {
        Self {
            key,
            in_flight,
            tx: Some(tx),
            rx,
        }
    }

    /// Settle the computation, releasing every waiter with `outcome`.
    /// Unregistration happens in `Drop` right after.
    fn complete(mut self, outcome: Outcome<V>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(outcome));
        }
    }
}

impl<V> Drop for InFlightGuard<V> {
    fn drop(&mut self) {
        // If tx is still Some, complete() was never called: the producer
        // panicked or was dropped mid-run.
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(Outcome::Abandoned));
        }

        // Only unregister our own channel; a replacement registered after
        // this computation settled must survive.
        self.in_flight
            .remove_if(&self.key, |_, rx| rx.same_channel(&self.rx));
    }
}

struct CacheInner<V> {
    store: Arc<dyn SharedStore>,
    config: CacheConfig,
    /// Tracks in-flight computations for request coalescing
    in_flight: Arc<DashMap<String, InFlightRx<V>>>,
}

/// Key-addressed, TTL-bound memoization for async computations.
///
/// Cloning is cheap and every clone shares the same store and in-flight
/// table.
pub struct RequestCache<V: Cacheable> {
    inner: Arc<CacheInner<V>>,
}

impl<V: Cacheable> Clone for RequestCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Cacheable> RequestCache<V> {
    /// Create a cache over `store` with the default configuration.
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    /// Create a cache over `store` with an explicit configuration.
    ///
    /// When `sweep_interval` is set this must be called from within a
    /// tokio runtime, as it spawns the background sweep task. The task
    /// holds no strong reference to the cache and exits once the last
    /// handle is dropped.
    pub fn with_config(store: Arc<dyn SharedStore>, config: CacheConfig) -> Self {
        let sweep_interval = config.sweep_interval;
        let cache = Self {
            inner: Arc::new(CacheInner {
                store,
                config,
                in_flight: Arc::new(DashMap::new()),
            }),
        };
        if let Some(interval) = sweep_interval {
            cache.spawn_sweeper(interval);
        }
        cache
    }

    fn spawn_sweeper(&self, interval: Duration) {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                match inner.store.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => debug!("Background sweep removed {} expired entries", removed),
                    Err(e) => warn!("Background sweep failed: {}. Continuing.", e),
                }
            }
        });
    }

    /// Get the value for `key`, computing it with `producer` on a miss.
    ///
    /// - An unexpired cached value is returned without running `producer`.
    /// - If another caller is already computing `key`, this call waits for
    ///   that computation and shares its outcome instead of recomputing.
    /// - Otherwise `producer` runs as a detached task; its success is
    ///   cached for `ttl` and its failure is fanned out to every waiter
    ///   and then discarded. Retry policy belongs to the caller.
    ///
    /// A zero `ttl` means "always compute": the producer runs inline and
    /// neither the store nor the in-flight table is consulted.
    ///
    /// The producer future must own its captures (`move`), as it may
    /// outlive this call.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
    {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("key must not be empty"));
        }

        if ttl.is_zero() {
            let value = producer()
                .await
                .map_err(|e| CacheError::Producer(Arc::new(e)))?;
            return Ok(Arc::new(value));
        }

        if let Some(value) = self.load(key).await {
            debug!("Cache hit for key: {}", key);
            return Ok(value);
        }

        match self.claim(key) {
            Claim::Wait(rx) => {
                debug!("Waiting for in-flight computation for key: {}", key);
                self.wait(rx).await
            }
            Claim::Run(guard) => {
                debug!("Cache miss for key: {}", key);
                let rx = guard.rx.clone();
                let store = Arc::clone(&self.inner.store);
                let owned_key = key.to_owned();
                let fut = producer();

                // Detached so cancelled callers never cancel the shared
                // computation; an abandoned producer still populates the
                // cache for future callers.
                tokio::spawn(async move {
                    match fut.await {
                        Ok(value) => {
                            let value = Arc::new(value);
                            store_value(store.as_ref(), &owned_key, value.as_ref(), ttl).await;
                            guard.complete(Outcome::Value(value));
                        }
                        Err(e) => {
                            error!("Producer error for key {}: {}", owned_key, e);
                            guard.complete(Outcome::Producer(Arc::new(e)));
                        }
                    }
                });

                self.wait(rx).await
            }
        }
    }

    /// Remove any cached value for `key`.
    ///
    /// In-flight computations are unaffected: one that completes after
    /// this call repopulates the cache. Removing an absent key succeeds.
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("key must not be empty"));
        }
        debug!("Invalidating cache for key: {}", key);
        self.inner.store.delete(key).await?;
        Ok(())
    }

    /// Eagerly remove expired entries from the store, returning how many
    /// were dropped. Safe to call concurrently with `get_or_compute`.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let removed = self.inner.store.purge_expired().await?;
        if removed > 0 {
            debug!("Purged {} expired entries", removed);
        }
        Ok(removed)
    }

    /// Read `key` from the store, treating every failure as a miss.
    async fn load(&self, key: &str) -> Option<Arc<V>> {
        let bytes = match self.inner.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    "Store GET error for key {} ({}). Falling back to compute.",
                    key, e
                );
                return None;
            }
        };

        match serde_json::from_slice::<V>(&bytes) {
            Ok(value) => Some(Arc::new(value)),
            Err(e) => {
                warn!(
                    "Failed to deserialize cached value for key {}: {}. Deleting corrupt entry.",
                    key, e
                );
                if let Err(del_err) = self.inner.store.delete(key).await {
                    warn!(
                        "Failed to delete corrupt entry for key {}: {}",
                        key, del_err
                    );
                }
                None
            }
        }
    }

    /// Join the in-flight computation for `key`, or claim ownership of a
    /// new one. The whole decision happens under the key's shard lock.
    fn claim(&self, key: &str) -> Claim<V> {
        match self.inner.in_flight.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().borrow().is_none() {
                    Claim::Wait(occupied.get().clone())
                } else {
                    // The previous computation settled but its guard has
                    // not unregistered yet. Its value lives in the store
                    // (if anywhere); joining it here could resurrect data
                    // that was just invalidated, so start fresh.
                    let (tx, rx) = watch::channel(None);
                    occupied.insert(rx.clone());
                    Claim::Run(InFlightGuard::new(
                        key.to_owned(),
                        Arc::clone(&self.inner.in_flight),
                        tx,
                        rx,
                    ))
                }
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx.clone());
                Claim::Run(InFlightGuard::new(
                    key.to_owned(),
                    Arc::clone(&self.inner.in_flight),
                    tx,
                    rx,
                ))
            }
        }
    }

    /// Wait for an in-flight computation, honoring `wait_timeout`.
    async fn wait(&self, rx: InFlightRx<V>) -> Result<Arc<V>, CacheError> {
        match self.inner.config.wait_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait_for_outcome(rx)).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Timeout),
            },
            None => wait_for_outcome(rx).await,
        }
    }
}

async fn wait_for_outcome<V>(mut rx: InFlightRx<V>) -> Result<Arc<V>, CacheError> {
    loop {
        // Clone the settled outcome out so no borrow is held across await.
        let settled = rx.borrow_and_update().clone();
        if let Some(outcome) = settled {
            return match outcome {
                Outcome::Value(value) => Ok(value),
                Outcome::Producer(e) => Err(CacheError::Producer(e)),
                Outcome::Abandoned => Err(CacheError::Abandoned),
            };
        }
        if rx.changed().await.is_err() {
            // Sender dropped without settling
            return Err(CacheError::Abandoned);
        }
    }
}

/// Serialize and write a computed value. Best effort: failures are logged
/// and the value is still delivered to waiters.
async fn store_value<V: Cacheable>(store: &dyn SharedStore, key: &str, value: &V, ttl: Duration) {
    let bytes = match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(
                "Failed to serialize value for key {}: {}. Skipping cache write.",
                key, e
            );
            return;
        }
    };
    if let Err(e) = store.set(key, bytes, ttl).await {
        warn!(
            "Store SET error for key {}: {}. Continuing without caching.",
            key, e
        );
    }
}
