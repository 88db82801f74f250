use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::MultiplexedConnection};

use crate::{cache::CacheBackend, error::GatewayError};

const KEY_PREFIX: &str = "quotagate";

// DECRBY would create a missing key without expiry
const DECR_IF_EXISTS: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('DECRBY', KEYS[1], ARGV[1])
end
return false
";

/// Shared cache backend for multi instance deployments
pub struct RedisCache {
    conn: MultiplexedConnection,
    decr: Script,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        let client = redis::Client::open(url).map_err(|e| GatewayError::cache("redis_open", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| GatewayError::cache("redis_connect", e))?;
        Ok(Self {
            conn,
            decr: Script::new(DECR_IF_EXISTS),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{KEY_PREFIX}:{key}")
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn is_distributed(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>, GatewayError> {
        let mut conn = self.conn.clone();
        conn.get(self.key(key))
            .await
            .map_err(|e| GatewayError::cache("get", e))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1))
            .await
            .map_err(|e| GatewayError::cache("set", e))
    }

    async fn delete(&self, key: &str) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key))
            .await
            .map_err(|e| GatewayError::cache("delete", e))
    }

    async fn decr_by(&self, key: &str, n: i64) -> Result<Option<i64>, GatewayError> {
        let mut conn = self.conn.clone();
        self.decr
            .key(self.key(key))
            .arg(n)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| GatewayError::cache("decr_by", e))
    }
}
