//! Redis store backend

use std::time::Duration;

use redis::AsyncCommands;

use crate::error::StoreError;
use crate::store::{CounterValue, SharedStore};

/// INCRBY, then arm the key's expiry only when it carries none yet, so
/// increments within a window never extend it. Returns the post-increment
/// count and the key's remaining lifetime in milliseconds.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    ttl = tonumber(ARGV[2])
end
return {count, ttl}
"#;

/// [`SharedStore`] backed by Redis, shared across process instances.
///
/// Uses a `ConnectionManager`, which reconnects automatically; the
/// manager is cloned per operation. Expiry is delegated to the server
/// (PSETEX / PEXPIRE), so [`purge_expired`](SharedStore::purge_expired)
/// has nothing to do and reports 0.
pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
    increment: redis::Script,
}

impl RedisStore {
    /// Connect to Redis and build a store around a fresh connection
    /// manager.
    pub async fn connect(client: redis::Client) -> Result<Self, redis::RedisError> {
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self::with_manager(manager))
    }

    /// Build a store around an existing connection manager.
    pub fn with_manager(manager: redis::aio::ConnectionManager) -> Self {
        Self {
            manager,
            increment: redis::Script::new(INCREMENT_SCRIPT),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(Box::new(e))
    }
}

/// PSETEX and PEXPIRE reject non-positive lifetimes; clamp up to 1ms.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait::async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        amount: u64,
        ttl: Duration,
    ) -> Result<CounterValue, StoreError> {
        let mut conn = self.manager.clone();
        let (count, pttl): (u64, i64) = self
            .increment
            .key(key)
            .arg(amount)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        Ok(CounterValue {
            count,
            resets_in: Duration::from_millis(pttl.max(0) as u64),
        })
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        // The server expires keys on its own.
        Ok(0)
    }
}
