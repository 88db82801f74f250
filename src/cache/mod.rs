use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    config::GatewayConfig,
    error::GatewayError,
    persistence::RecordStore,
    types::{ChannelStatus, Token, TokenState},
};

mod local;
#[cfg(feature = "redis")]
mod redis;
mod roster;

pub use local::LocalCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use roster::{ChannelRoster, OptionSnapshot};

/// Key/value cache with per entry expiry
///
/// Either process local or shared between gateway instances. The choice is
/// made once at startup, see [`connect`].
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Whether other processes see the same entries
    fn is_distributed(&self) -> bool;
    async fn get(&self, key: &str) -> Result<Option<String>, GatewayError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), GatewayError>;
    async fn delete(&self, key: &str) -> Result<(), GatewayError>;
    /// Decrements an integer entry and returns the new value, `None` if absent
    async fn decr_by(&self, key: &str, n: i64) -> Result<Option<i64>, GatewayError>;
}

/// Builds the cache backend selected by configuration
pub async fn connect(config: &GatewayConfig) -> Result<Arc<dyn CacheBackend>, GatewayError> {
    match config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => {
            let cache = RedisCache::connect(url).await?;
            info!("Cache backend: redis");
            Ok(Arc::new(cache))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            warn!("redis_url is set but the redis feature is not compiled in, using local cache");
            Ok(Arc::new(LocalCache::default()))
        }
        None => {
            info!("Cache backend: local");
            Ok(Arc::new(LocalCache::default()))
        }
    }
}

fn token_key(key: &str) -> String {
    format!("token:{key}")
}

fn user_quota_key(id: i64) -> String {
    format!("user_quota:{id}")
}

/// Read path in front of the record store
///
/// Token and user balance lookups go through the cache backend when caching
/// is enabled. The channel roster and option values are snapshots swapped in
/// whole by the sync loop, so readers never observe a half refreshed view.
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    store: Arc<dyn RecordStore>,
    enabled: bool,
    ttl: Duration,
    roster: ArcSwap<ChannelRoster>,
    options: ArcSwap<OptionSnapshot>,
}

impl CacheLayer {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        store: Arc<dyn RecordStore>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            backend,
            store,
            enabled: config.memory_cache_enabled,
            ttl: config.token_ttl(),
            roster: ArcSwap::from_pointee(ChannelRoster::default()),
            options: ArcSwap::from_pointee(OptionSnapshot::default()),
        }
    }

    pub fn is_distributed(&self) -> bool {
        self.enabled && self.backend.is_distributed()
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Looks a token up by its secret, cache first
    pub async fn token_by_key(&self, key: &str) -> Result<Option<Token>, GatewayError> {
        if self.enabled {
            match self.backend.get(&token_key(key)).await {
                Ok(Some(raw)) => match serde_json::from_str::<Token>(&raw) {
                    Ok(token) => return Ok(Some(token)),
                    Err(e) => warn!("Dropping undecodable cached token: {}", e),
                },
                Ok(None) => {}
                Err(e) => warn!("Token cache read failed: {}", e),
            }
        }
        let token = self.store.get_token_by_key(key).await?;
        if self.enabled
            && let Some(token) = &token
        {
            let raw = serde_json::to_string(token)?;
            if let Err(e) = self.backend.set(&token_key(key), raw, self.ttl).await {
                warn!("Token cache write failed: {}", e);
            }
        }
        Ok(token)
    }

    pub async fn invalidate_token(&self, key: &str) {
        if self.enabled
            && let Err(e) = self.backend.delete(&token_key(key)).await
        {
            warn!("Token cache invalidation failed: {}", e);
        }
    }

    /// Resolves a token secret into a usable token
    ///
    /// Expiry and exhaustion found here are written back to the record store
    /// only when the cache is local. With a shared cache the entry simply
    /// ages out and the next lookup re-reads the store.
    pub async fn validate_token(&self, key: &str, now: i64) -> Result<Token, GatewayError> {
        if key.trim().is_empty() {
            return Err(GatewayError::TokenNotFound);
        }
        let token = self
            .token_by_key(key)
            .await?
            .ok_or(GatewayError::TokenNotFound)?;
        let state = TokenState::evaluate(&token, now);
        if let Some(status) = state.status_flip(&token)
            && !self.is_distributed()
        {
            debug!(token_id = token.id, %status, "Writing back token status");
            if let Err(e) = self.store.update_token_status(token.id, status, now).await {
                warn!(token_id = token.id, "Failed to write back token status: {}", e);
            }
            self.invalidate_token(key).await;
        }
        state.into_result()?;
        Ok(token)
    }

    /// Cached spendable balance of a user, if one is cached
    ///
    /// The cached value already includes deltas the write coalescer has not
    /// flushed; it is filled and adjusted only under the ledger's per user lock.
    pub async fn cached_user_quota(&self, user_id: i64) -> Option<i64> {
        if !self.enabled {
            return None;
        }
        match self.backend.get(&user_quota_key(user_id)).await {
            Ok(raw) => raw.and_then(|r| r.parse::<i64>().ok()),
            Err(e) => {
                warn!(user_id, "User quota cache read failed: {}", e);
                None
            }
        }
    }

    pub async fn fill_user_quota(&self, user_id: i64, quota: i64) {
        if self.enabled
            && let Err(e) = self
                .backend
                .set(&user_quota_key(user_id), quota.to_string(), self.ttl)
                .await
        {
            warn!(user_id, "User quota cache write failed: {}", e);
        }
    }

    /// Mirrors a debit into the cached balance, if one is cached
    pub async fn decrease_user_quota(&self, user_id: i64, amount: i64) {
        if !self.enabled || amount == 0 {
            return;
        }
        if let Err(e) = self.backend.decr_by(&user_quota_key(user_id), amount).await {
            warn!(user_id, "User quota cache decrement failed: {}", e);
            self.invalidate_user_quota(user_id).await;
        }
    }

    pub async fn invalidate_user_quota(&self, user_id: i64) {
        if self.enabled
            && let Err(e) = self.backend.delete(&user_quota_key(user_id)).await
        {
            warn!(user_id, "User quota cache invalidation failed: {}", e);
        }
    }

    pub fn roster(&self) -> Arc<ChannelRoster> {
        self.roster.load_full()
    }

    pub fn options(&self) -> Arc<OptionSnapshot> {
        self.options.load_full()
    }

    /// Reflects a status change in the current roster without a full reload
    pub fn set_channel_status(&self, id: i64, status: ChannelStatus, reason: Option<&str>) {
        self.roster
            .rcu(|roster| roster.with_status(id, status, reason));
    }

    /// Re-reads all channels and swaps the roster
    pub async fn sync_channels(&self) -> Result<usize, GatewayError> {
        let channels = self.store.list_channels().await?;
        let roster = ChannelRoster::new(channels);
        let count = roster.len();
        self.roster.store(Arc::new(roster));
        Ok(count)
    }

    /// Re-reads option values and swaps the snapshot
    pub async fn sync_options(&self) -> Result<usize, GatewayError> {
        let values = self.store.load_options().await?;
        let count = values.len();
        self.options.store(Arc::new(OptionSnapshot::new(values)));
        Ok(count)
    }

    pub async fn sync(&self) -> Result<(), GatewayError> {
        let channels = self.sync_channels().await?;
        let options = self.sync_options().await?;
        debug!(channels, options, "Cache snapshots refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        persistence::MemoryStore,
        types::{Channel, TokenStatus},
    };

    fn layer(store: Arc<MemoryStore>) -> CacheLayer {
        CacheLayer::new(
            Arc::new(LocalCache::new(64)),
            store,
            &GatewayConfig::default(),
        )
    }

    #[tokio::test]
    async fn token_lookup_is_cached() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_token(Token {
                key: "sk-1".into(),
                remain_quota: 5,
                ..Default::default()
            })
            .await
            .unwrap();
        let cache = layer(store.clone());
        let id = cache.token_by_key("sk-1").await.unwrap().unwrap().id;
        // stale until invalidated
        store.add_token_quota(id, 10, 0).await.unwrap();
        assert_eq!(
            cache.token_by_key("sk-1").await.unwrap().unwrap().remain_quota,
            5
        );
        cache.invalidate_token("sk-1").await;
        assert_eq!(
            cache.token_by_key("sk-1").await.unwrap().unwrap().remain_quota,
            15
        );
    }

    #[tokio::test]
    async fn expired_token_is_written_back_locally() {
        let store = Arc::new(MemoryStore::new());
        let id = store
            .insert_token(Token {
                key: "sk-old".into(),
                remain_quota: 5,
                expired_time: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        let cache = layer(store.clone());
        assert!(matches!(
            cache.validate_token("sk-old", 100).await,
            Err(GatewayError::TokenExpired)
        ));
        assert_eq!(
            store.get_token(id).await.unwrap().unwrap().status,
            TokenStatus::Expired
        );
        assert!(matches!(
            cache.validate_token("sk-none", 100).await,
            Err(GatewayError::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn user_quota_mirrors_decrements() {
        let cache = layer(Arc::new(MemoryStore::new()));
        assert_eq!(cache.cached_user_quota(7).await, None);
        // decrementing a missing entry must not create one
        cache.decrease_user_quota(7, 10).await;
        assert_eq!(cache.cached_user_quota(7).await, None);
        cache.fill_user_quota(7, 100).await;
        cache.decrease_user_quota(7, 40).await;
        assert_eq!(cache.cached_user_quota(7).await, Some(60));
        cache.decrease_user_quota(7, -15).await;
        assert_eq!(cache.cached_user_quota(7).await, Some(75));
        cache.invalidate_user_quota(7).await;
        assert_eq!(cache.cached_user_quota(7).await, None);
    }

    #[tokio::test]
    async fn sync_swaps_roster() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_channels(vec![Channel::default(), Channel::default()])
            .await
            .unwrap();
        store.set_option("QuotaRemindThreshold", "7").await.unwrap();
        let cache = layer(store);
        assert!(cache.roster().is_empty());
        cache.sync().await.unwrap();
        let roster = cache.roster();
        assert_eq!(roster.len(), 2);
        cache.set_channel_status(roster.channels()[0].id, ChannelStatus::AutoDisabled, None);
        assert_eq!(cache.roster().enabled_count(), 1);
        assert_eq!(roster.enabled_count(), 2);
        assert_eq!(cache.options().i64_or("QuotaRemindThreshold", 0), 7);
    }
}
