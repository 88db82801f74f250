use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    cache::CacheLayer,
    error::GatewayError,
    persistence::RecordStore,
    services::{ledger::QuotaLedger, log_pipeline::LogPipeline},
    types::{LogType, Redemption, RedemptionStatus},
    utils::{display_quota, now},
};

/// Longest key accepted from a caller
const MAX_KEY_LEN: usize = 32;
const MAX_NAME_LEN: usize = 20;
/// Most codes issued by a single request
const MAX_BATCH: usize = 100;

/// Codes issued by [`RedemptionService::create`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCodes {
    pub ids: Vec<i64>,
    pub keys: Vec<String>,
}

/// Issues and claims single use quota codes
pub struct RedemptionService {
    store: Arc<dyn RecordStore>,
    cache: Arc<CacheLayer>,
    logs: Arc<LogPipeline>,
    ledger: Arc<QuotaLedger>,
}

impl RedemptionService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<CacheLayer>,
        logs: Arc<LogPipeline>,
        ledger: Arc<QuotaLedger>,
    ) -> Self {
        Self {
            store,
            cache,
            logs,
            ledger,
        }
    }

    /// Claims `key` for `user_id`, returning the credited quota
    ///
    /// The claim and the balance increment are one store transaction, so
    /// concurrent claims of one code credit exactly once.
    pub async fn redeem(&self, key: &str, user_id: i64) -> Result<i64, GatewayError> {
        let key = key.trim();
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(GatewayError::InvalidRedemptionKey);
        }
        if user_id <= 0 {
            return Err(GatewayError::UserNotFound { id: user_id });
        }
        let quota = {
            let _user = self.ledger.lock_user(user_id).await;
            let quota = self.store.redeem(key, user_id, now()).await?;
            self.cache.invalidate_user_quota(user_id).await;
            quota
        };
        info!(user_id, quota, "Redemption code claimed");
        let content = format!("Redeemed {} with a redemption code", display_quota(quota));
        if let Err(e) = self.logs.record(user_id, LogType::Topup, content).await {
            warn!(user_id, "Failed to record top-up log: {}", e);
        }
        Ok(quota)
    }

    /// Issues `count` fresh codes worth `quota` each
    pub async fn create(
        &self,
        name: &str,
        quota: i64,
        count: usize,
    ) -> Result<IssuedCodes, GatewayError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(GatewayError::BadRequest {
                msg: "redemption name must be 1 to 20 characters",
            });
        }
        if count == 0 || count > MAX_BATCH {
            return Err(GatewayError::BadRequest {
                msg: "redemption count must be between 1 and 100",
            });
        }
        if quota <= 0 {
            return Err(GatewayError::InvalidQuotaAmount { amount: quota });
        }
        let created_time = now();
        let codes = (0..count)
            .map(|_| Redemption {
                key: uuid::Uuid::new_v4().simple().to_string(),
                status: RedemptionStatus::Enabled,
                name: name.to_string(),
                quota,
                created_time,
                ..Default::default()
            })
            .collect::<Vec<_>>();
        let keys = codes.iter().map(|c| c.key.clone()).collect();
        let ids = self.store.insert_redemptions(codes).await?;
        info!(count, quota, "Redemption codes issued");
        Ok(IssuedCodes { ids, keys })
    }
}
