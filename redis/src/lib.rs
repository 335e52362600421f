//! Redis-based fast inventory cache.
//!
//! Each product's counters live in a hash `inventory:<product_id>` with
//! fields `available` and `reserved`. All mutations run as Lua scripts, so
//! every operation is a single indivisible unit on its key, which is the
//! only property the saga relies on.
//!
//! The cache is the low-latency decision point, not the durable record: the
//! inventory coordinator mirrors every cache-originated mutation to the
//! durable store and periodically resets the cache from store values.
//!
//! # Example
//!
//! ```no_run
//! use orderflow_redis::RedisInventoryCache;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = RedisInventoryCache::connect("127.0.0.1:6379", None, 0).await?;
//! # Ok(())
//! # }
//! ```

use orderflow_core::domain::{InventoryLevel, ProductId};
use orderflow_core::ports::InventoryCache;
use orderflow_core::{Error, Result};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;

/// Response deadline for every cache call.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// RESERVE: move `q` from `available` to `reserved` iff enough is available.
/// Returns 1 on success, 0 on insufficient stock, -1 on an unseeded key.
const RESERVE_SCRIPT: &str = r"
    local available = redis.call('HGET', KEYS[1], 'available')
    if available == false then
        return -1
    end
    local q = tonumber(ARGV[1])
    if tonumber(available) < q then
        return 0
    end
    redis.call('HINCRBY', KEYS[1], 'available', -q)
    redis.call('HINCRBY', KEYS[1], 'reserved', q)
    return 1
";

/// RELEASE: unconditionally move `q` from `reserved` back to `available`.
/// Returns 1, or -1 on an unseeded key.
const RELEASE_SCRIPT: &str = r"
    if redis.call('EXISTS', KEYS[1]) == 0 then
        return -1
    end
    local q = tonumber(ARGV[1])
    redis.call('HINCRBY', KEYS[1], 'available', q)
    redis.call('HINCRBY', KEYS[1], 'reserved', -q)
    return 1
";

/// COMMIT: subtract `q` from `reserved` iff enough is reserved.
/// Returns 1 on success, 0 otherwise, -1 on an unseeded key.
const COMMIT_SCRIPT: &str = r"
    local reserved = redis.call('HGET', KEYS[1], 'reserved')
    if reserved == false then
        return -1
    end
    local q = tonumber(ARGV[1])
    if tonumber(reserved) < q then
        return 0
    end
    redis.call('HINCRBY', KEYS[1], 'reserved', -q)
    return 1
";

/// Redis-backed [`InventoryCache`] using atomic Lua scripts over a pooled
/// [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisInventoryCache {
    conn_manager: ConnectionManager,
    reserve_script: Script,
    release_script: Script,
    commit_script: Script,
}

impl RedisInventoryCache {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `addr` - host:port of the Redis endpoint
    /// * `password` - optional AUTH password
    /// * `db` - logical database index
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] when the client cannot be created or the
    /// connection manager cannot reach the server.
    pub async fn connect(addr: &str, password: Option<&str>, db: i64) -> Result<Self> {
        let url = match password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{password}@{addr}/{db}")
            },
            _ => format!("redis://{addr}/{db}"),
        };

        let client = Client::open(url)
            .map_err(|e| Error::Backend(format!("failed to create redis client: {e}")))?;

        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(RESPONSE_TIMEOUT)
            .set_response_timeout(RESPONSE_TIMEOUT);

        let conn_manager = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(|e| Error::Backend(format!("failed to connect to redis: {e}")))?;

        tracing::info!(addr = %addr, db = db, "connected inventory cache");

        Ok(Self {
            conn_manager,
            reserve_script: Script::new(RESERVE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            commit_script: Script::new(COMMIT_SCRIPT),
        })
    }

    /// Redis key for a product's counters.
    fn inventory_key(product_id: ProductId) -> String {
        format!("inventory:{product_id}")
    }

    async fn run_script(&self, script: &Script, product_id: ProductId, quantity: i64) -> Result<i64> {
        let mut conn = self.conn_manager.clone();
        let key = Self::inventory_key(product_id);
        script
            .key(&key)
            .arg(quantity)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Backend(format!("inventory script failed for {key}: {e}")))
    }
}

impl InventoryCache for RedisInventoryCache {
    async fn try_reserve(&self, product_id: ProductId, quantity: i64) -> Result<bool> {
        match self.run_script(&self.reserve_script, product_id, quantity).await? {
            1 => {
                metrics::counter!("orderflow.cache.reserved").increment(1);
                Ok(true)
            },
            0 => Ok(false),
            _ => Err(Error::Backend(format!("inventory key for {product_id} not seeded"))),
        }
    }

    async fn release(&self, product_id: ProductId, quantity: i64) -> Result<()> {
        match self.run_script(&self.release_script, product_id, quantity).await? {
            1 => {
                metrics::counter!("orderflow.cache.released").increment(1);
                Ok(())
            },
            _ => Err(Error::Backend(format!("inventory key for {product_id} not seeded"))),
        }
    }

    async fn commit(&self, product_id: ProductId, quantity: i64) -> Result<bool> {
        match self.run_script(&self.commit_script, product_id, quantity).await? {
            1 => {
                metrics::counter!("orderflow.cache.committed").increment(1);
                Ok(true)
            },
            0 => {
                tracing::warn!(
                    product_id = %product_id,
                    quantity = quantity,
                    "cache commit found less reserved than requested"
                );
                Ok(false)
            },
            _ => Err(Error::Backend(format!("inventory key for {product_id} not seeded"))),
        }
    }

    async fn seed(&self, level: &InventoryLevel) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let key = Self::inventory_key(level.product_id);
        let _: () = redis::pipe()
            .atomic()
            .hset(&key, "available", level.available)
            .hset(&key, "reserved", level.reserved)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Backend(format!("failed to seed {key}: {e}")))?;

        tracing::debug!(
            product_id = %level.product_id,
            available = level.available,
            reserved = level.reserved,
            "seeded inventory key"
        );
        Ok(())
    }

    async fn read(&self, product_id: ProductId) -> Result<Option<(i64, i64)>> {
        let mut conn = self.conn_manager.clone();
        let key = Self::inventory_key(product_id);
        let values: Vec<Option<i64>> = conn
            .hget(&key, &["available", "reserved"])
            .await
            .map_err(|e| Error::Backend(format!("failed to read {key}: {e}")))?;

        match values.as_slice() {
            [Some(available), Some(reserved)] => Ok(Some((*available, *reserved))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedisInventoryCache>();
        assert_sync::<RedisInventoryCache>();
    }

    #[test]
    fn key_scheme() {
        assert_eq!(RedisInventoryCache::inventory_key(ProductId::new(42)), "inventory:42");
    }

    #[test]
    fn scripts_guard_their_preconditions() {
        assert!(RESERVE_SCRIPT.contains("available"));
        assert!(RESERVE_SCRIPT.contains("return 0"));
        assert!(COMMIT_SCRIPT.contains("reserved"));
        assert!(RELEASE_SCRIPT.contains("EXISTS"));
    }
}
