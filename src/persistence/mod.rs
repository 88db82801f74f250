use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    config::GatewayConfig,
    error::GatewayError,
    types::{
        Channel, ChannelStatus, LogEntry, LogFilter, Redemption, Token, TokenStatus, User,
        UserRole, UserStatus,
    },
};

/// Balance given to the account created on an empty store
pub const ROOT_INITIAL_QUOTA: i64 = 100_000_000;

mod memory;

pub use memory::MemoryStore;

// Feature-gated DB module providing the durable implementation
#[cfg(feature = "db")]
pub mod db;

/// Durable table storage behind the control plane
///
/// Every counter mutation is a delta applied by the store itself
/// (`col = col + delta`), never a read-modify-write from the caller.
/// Implementations back onto a database or process memory.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Short backend name for status reporting
    fn backend(&self) -> &'static str;

    /// Health summary for the admin status endpoint
    async fn status(&self) -> serde_json::Value {
        serde_json::json!({ "backend": self.backend(), "healthy": true })
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, GatewayError>;
    async fn get_channel(&self, id: i64) -> Result<Option<Channel>, GatewayError>;
    /// Bulk insert, returning the assigned ids in input order
    async fn insert_channels(&self, channels: Vec<Channel>) -> Result<Vec<i64>, GatewayError>;
    async fn update_channel_status(
        &self,
        id: i64,
        status: ChannelStatus,
        reason: Option<String>,
    ) -> Result<(), GatewayError>;
    async fn update_channel_test_result(
        &self,
        id: i64,
        response_time_ms: i64,
        tested_at: i64,
    ) -> Result<(), GatewayError>;
    async fn update_channel_balance(
        &self,
        id: i64,
        balance: f64,
        updated_at: i64,
    ) -> Result<(), GatewayError>;
    async fn add_channel_used_quota(&self, id: i64, delta: i64) -> Result<(), GatewayError>;
    async fn delete_channels_by_status(
        &self,
        statuses: &[ChannelStatus],
    ) -> Result<u64, GatewayError>;

    async fn insert_token(&self, token: Token) -> Result<i64, GatewayError>;
    async fn get_token(&self, id: i64) -> Result<Option<Token>, GatewayError>;
    async fn get_token_by_key(&self, key: &str) -> Result<Option<Token>, GatewayError>;
    async fn update_token_status(
        &self,
        id: i64,
        status: TokenStatus,
        accessed_at: i64,
    ) -> Result<(), GatewayError>;
    /// `remain_quota += delta`, `used_quota -= delta`
    async fn add_token_quota(
        &self,
        id: i64,
        delta: i64,
        accessed_at: i64,
    ) -> Result<(), GatewayError>;
    /// Moves `amount` from remaining to used only if enough remains
    async fn try_debit_token(
        &self,
        id: i64,
        amount: i64,
        accessed_at: i64,
    ) -> Result<bool, GatewayError>;

    async fn insert_user(&self, user: User) -> Result<i64, GatewayError>;
    async fn get_user(&self, id: i64) -> Result<Option<User>, GatewayError>;
    async fn add_user_quota(&self, id: i64, delta: i64) -> Result<(), GatewayError>;
    async fn add_user_used_quota(&self, id: i64, delta: i64) -> Result<(), GatewayError>;
    async fn add_user_request_count(&self, id: i64, delta: i64) -> Result<(), GatewayError>;
    /// Moves `amount` from balance to used quota only if the balance covers it
    async fn try_debit_user(&self, id: i64, amount: i64) -> Result<bool, GatewayError>;
    async fn count_users(&self) -> Result<u64, GatewayError>;
    async fn root_user_email(&self) -> Result<Option<String>, GatewayError>;

    async fn insert_redemptions(
        &self,
        redemptions: Vec<Redemption>,
    ) -> Result<Vec<i64>, GatewayError>;
    async fn get_redemption_by_key(&self, key: &str) -> Result<Option<Redemption>, GatewayError>;
    /// Claims a code for `user_id` and credits its quota in one transaction
    ///
    /// Returns the credited quota. A code that is no longer enabled fails
    /// with [`GatewayError::RedemptionAlreadyUsed`].
    async fn redeem(&self, key: &str, user_id: i64, now: i64) -> Result<i64, GatewayError>;

    async fn insert_logs(&self, logs: &[LogEntry]) -> Result<(), GatewayError>;
    async fn list_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, GatewayError>;
    async fn delete_logs_before(&self, timestamp: i64) -> Result<u64, GatewayError>;
    /// Quota charged by consume records matching `filter`; paging is ignored
    async fn sum_used_quota(&self, filter: &LogFilter) -> Result<i64, GatewayError>;
    /// Prompt plus completion tokens of consume records matching `filter`
    async fn sum_used_tokens(&self, filter: &LogFilter) -> Result<i64, GatewayError>;

    async fn load_options(&self) -> Result<HashMap<String, String>, GatewayError>;
    async fn set_option(&self, key: &str, value: &str) -> Result<(), GatewayError>;
}

/// Builds the record store selected by configuration
pub async fn connect(config: &GatewayConfig) -> Result<Arc<dyn RecordStore>, GatewayError> {
    let store: Arc<dyn RecordStore> = match config.database_url.as_deref() {
        #[cfg(feature = "db")]
        Some(url) => {
            let store = db::DbStore::connect(url).await?;
            info!("Record store: database");
            Arc::new(store)
        }
        #[cfg(not(feature = "db"))]
        Some(_) => {
            warn!("database_url is set but the db feature is not compiled in, using memory store");
            Arc::new(MemoryStore::default())
        }
        None => {
            info!("Record store: memory");
            Arc::new(MemoryStore::default())
        }
    };
    ensure_root_user(store.as_ref(), config).await?;
    Ok(store)
}

/// Creates the root account when the store has no users at all
///
/// Returns the id of the created account.
pub async fn ensure_root_user(
    store: &dyn RecordStore,
    config: &GatewayConfig,
) -> Result<Option<i64>, GatewayError> {
    if store.count_users().await? > 0 {
        return Ok(None);
    }
    let id = store
        .insert_user(User {
            username: "root".to_string(),
            email: config.root_email.clone(),
            role: UserRole::Root,
            status: UserStatus::Enabled,
            quota: ROOT_INITIAL_QUOTA,
            ..Default::default()
        })
        .await?;
    info!(id, "No users found, created the root account");
    Ok(Some(id))
}
