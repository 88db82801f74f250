use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use moka::{Expiry, sync::Cache};

use crate::{cache::CacheBackend, error::GatewayError};

#[derive(Clone)]
struct Entry {
    value: String,
    /// `None` when the ttl reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

/// Longest lifetime handed to moka for a single entry
const MAX_ENTRY_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

struct EntryExpiry;

impl EntryExpiry {
    fn remaining(value: &Entry, now: Instant) -> Option<Duration> {
        let left = value
            .expires_at
            .map_or(MAX_ENTRY_TTL, |at| at.saturating_duration_since(now));
        Some(left.min(MAX_ENTRY_TTL))
    }
}

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &Entry, created_at: Instant) -> Option<Duration> {
        Self::remaining(value, created_at)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Self::remaining(value, updated_at)
    }
}

/// Process local cache backend over moka
///
/// Each entry carries its own deadline; decrements keep it.
pub struct LocalCache {
    moka: Cache<String, Entry>,
    decr_lock: Mutex<()>,
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl LocalCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            moka: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(EntryExpiry)
                .build(),
            decr_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    fn is_distributed(&self) -> bool {
        false
    }

    async fn get(&self, key: &str) -> Result<Option<String>, GatewayError> {
        Ok(self.moka.get(key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), GatewayError> {
        self.moka.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), GatewayError> {
        self.moka.invalidate(key);
        Ok(())
    }

    async fn decr_by(&self, key: &str, n: i64) -> Result<Option<i64>, GatewayError> {
        let _guard = self.decr_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = self.moka.get(key) else {
            return Ok(None);
        };
        let Ok(current) = entry.value.parse::<i64>() else {
            return Err(GatewayError::BadRequest {
                msg: "cached value is not an integer",
            });
        };
        let next = current - n;
        self.moka.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: entry.expires_at,
            },
        );
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire_per_ttl() {
        let cache = LocalCache::new(16);
        cache
            .set("short", "1".into(), Duration::from_millis(30))
            .await
            .unwrap();
        cache
            .set("long", "2".into(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn oversized_ttl_does_not_overflow() {
        let cache = LocalCache::new(16);
        cache.set("forever", "5".into(), Duration::MAX).await.unwrap();
        assert_eq!(cache.decr_by("forever", 2).await.unwrap(), Some(3));
        assert_eq!(cache.get("forever").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn decrement_keeps_value_numeric() {
        let cache = LocalCache::new(16);
        assert_eq!(cache.decr_by("missing", 5).await.unwrap(), None);
        cache
            .set("quota", "100".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.decr_by("quota", 30).await.unwrap(), Some(70));
        assert_eq!(cache.decr_by("quota", -5).await.unwrap(), Some(75));
        cache.delete("quota").await.unwrap();
        assert_eq!(cache.get("quota").await.unwrap(), None);
    }
}
