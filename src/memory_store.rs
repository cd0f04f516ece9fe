//! In-process store backend

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::store::{CounterValue, SharedStore};

/// Expired values inspected per write before giving up until the next
/// write or an explicit purge.
const SWEEP_BATCH: usize = 64;

/// In-process [`SharedStore`] over sharded concurrent maps.
///
/// Cached values and quota windows live in separate tables so data and
/// rate limit accounting never collide. Per-key atomicity comes from the
/// maps' shard locks; operations on distinct keys do not serialize behind
/// a single lock. Time is measured with `tokio::time::Instant`, so TTLs
/// follow tokio's (pausable) clock.
///
/// Expired entries are evicted lazily on read, in bounded batches on
/// write, and exhaustively by [`purge_expired`](SharedStore::purge_expired).
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, StoredValue>,
    windows: DashMap<String, RateWindow>,
}

#[derive(Debug)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

#[derive(Debug)]
struct RateWindow {
    count: u64,
    expires_at: Instant,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values currently resident, counting expired entries that
    /// have not been swept yet.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no values are resident.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop a bounded batch of expired values. Inspects at most
    /// `SWEEP_BATCH` entries so a write never pays for the whole table.
    fn sweep_batch(&self, now: Instant) {
        let expired: Vec<String> = self
            .values
            .iter()
            .take(SWEEP_BATCH)
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for key in expired {
            // Re-check under the shard lock; a newer write may have
            // replaced the entry since the scan.
            self.values.remove_if(&key, |_, v| v.expires_at <= now);
        }
    }
}

#[async_trait::async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let hit = match self.values.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.bytes.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if hit.is_none() {
            // Entry has expired; evict it unless a newer write replaced it.
            self.values.remove_if(key, |_, v| v.expires_at <= now);
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        self.values.insert(
            key.to_owned(),
            StoredValue {
                bytes: value,
                expires_at: now + ttl,
            },
        );
        self.sweep_batch(now);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        amount: u64,
        ttl: Duration,
    ) -> Result<CounterValue, StoreError> {
        let now = Instant::now();
        // The entry guard holds the shard lock for the whole
        // read-arm-increment sequence, which is the atomicity the rate
        // limiter depends on.
        let mut window = self.windows.entry(key.to_owned()).or_insert_with(|| RateWindow {
            count: 0,
            expires_at: now + ttl,
        });

        if window.expires_at <= now {
            // Previous window elapsed without being reclaimed; start fresh.
            window.count = 0;
            window.expires_at = now + ttl;
        }
        window.count = window.count.saturating_add(amount);

        Ok(CounterValue {
            count: window.count,
            resets_in: window.expires_at.saturating_duration_since(now),
        })
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut removed = 0u64;

        self.values.retain(|_, value| {
            if value.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });
        self.windows.retain(|_, window| {
            if window.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });

        Ok(removed)
    }
}
