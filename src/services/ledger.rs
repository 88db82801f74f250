use std::{sync::Arc, time::Duration};

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

use crate::{
    cache::CacheLayer,
    config::{GatewayConfig, OPT_QUOTA_REMIND_THRESHOLD},
    error::GatewayError,
    persistence::RecordStore,
    services::{
        coalescer::{DeltaKind, WriteCoalescer},
        notify::Notifier,
    },
    types::User,
    utils::{display_quota, now},
};

/// Quota taken by a successful [`QuotaLedger::pre_consume`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub token_id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub unlimited: bool,
}

/// Two phase quota accounting for tokens and users
///
/// Admission for one user is serialized by a per user lock, so concurrent
/// requests of that user never admit more than the balance. Counter changes
/// go to the record store as deltas, or to the [`WriteCoalescer`] when batch
/// updates are on. In the latter case admission adds the coalescer's pending
/// deltas to the stored balances. The user balance is read through the cache,
/// which only changes under the same per user lock.
pub struct QuotaLedger {
    store: Arc<dyn RecordStore>,
    cache: Arc<CacheLayer>,
    coalescer: Option<Arc<WriteCoalescer>>,
    notifier: Arc<dyn Notifier>,
    locks: Cache<i64, Arc<Mutex<()>>>,
    remind_threshold: i64,
    server_address: String,
}

impl QuotaLedger {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<CacheLayer>,
        coalescer: Option<Arc<WriteCoalescer>>,
        notifier: Arc<dyn Notifier>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            store,
            cache,
            coalescer,
            notifier,
            // Idle entries go away, held ones are touched on every acquire
            locks: Cache::builder()
                .time_to_idle(Duration::from_secs(600))
                .build(),
            remind_threshold: config.quota_remind_threshold,
            server_address: config.server_address.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_coalesced(&self) -> bool {
        self.coalescer.is_some()
    }

    fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .get_with(user_id, || Arc::new(Mutex::new(())))
    }

    /// Serializes a balance change made outside the ledger with admission
    ///
    /// Anything that credits a user directly in the record store must hold
    /// this while it writes and drops the cached balance.
    pub async fn lock_user(&self, user_id: i64) -> OwnedMutexGuard<()> {
        self.user_lock(user_id).lock_owned().await
    }

    fn pending(&self, kind: DeltaKind, id: i64) -> i64 {
        self.coalescer
            .as_ref()
            .map_or(0, |c| c.pending(kind, id))
    }

    /// Spendable balance including unflushed deltas, cache first
    ///
    /// Callers hold the user lock and, when coalescing, the coalescer's
    /// stable view.
    async fn user_balance(&self, user_id: i64) -> Result<i64, GatewayError> {
        if let Some(balance) = self.cache.cached_user_quota(user_id).await {
            return Ok(balance);
        }
        let stored = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(GatewayError::UserNotFound { id: user_id })?
            .quota;
        let balance = stored + self.pending(DeltaKind::UserQuota, user_id);
        self.cache.fill_user_quota(user_id, balance).await;
        Ok(balance)
    }

    /// Reserves `quota` from a token and its owner before upstream work
    ///
    /// Fails without touching any balance when the token (unless unlimited)
    /// or the user cannot cover the amount.
    pub async fn pre_consume(&self, token_id: i64, quota: i64) -> Result<Reservation, GatewayError> {
        if quota < 0 {
            return Err(GatewayError::InvalidQuotaAmount { amount: quota });
        }
        let user_id = self
            .store
            .get_token(token_id)
            .await?
            .ok_or(GatewayError::TokenNotFound)?
            .user_id;
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let _stable = match &self.coalescer {
            Some(coalescer) => Some(coalescer.stable_view().await),
            None => None,
        };

        let token = self
            .store
            .get_token(token_id)
            .await?
            .ok_or(GatewayError::TokenNotFound)?;
        let remaining = token.remain_quota + self.pending(DeltaKind::TokenQuota, token.id);
        if !token.unlimited_quota && remaining < quota {
            return Err(GatewayError::InsufficientTokenQuota {
                remaining,
                requested: quota,
            });
        }
        let balance = self.user_balance(user_id).await?;
        if balance < quota {
            return Err(GatewayError::InsufficientUserQuota {
                balance,
                requested: quota,
            });
        }
        let reservation = Reservation {
            token_id,
            user_id,
            amount: quota,
            unlimited: token.unlimited_quota,
        };
        if quota == 0 {
            return Ok(reservation);
        }

        match &self.coalescer {
            Some(coalescer) => {
                if !token.unlimited_quota {
                    coalescer.add_delta(DeltaKind::TokenQuota, token_id, -quota);
                }
                coalescer.add_delta(DeltaKind::UserQuota, user_id, -quota);
                coalescer.add_delta(DeltaKind::UsedQuota, user_id, quota);
            }
            None => {
                let at = now();
                if !token.unlimited_quota
                    && !self.store.try_debit_token(token_id, quota, at).await?
                {
                    return Err(GatewayError::InsufficientTokenQuota {
                        remaining,
                        requested: quota,
                    });
                }
                if !self.store.try_debit_user(user_id, quota).await? {
                    if !token.unlimited_quota
                        && let Err(e) = self.store.add_token_quota(token_id, quota, at).await
                    {
                        error!(token_id, quota, "Failed to refund token after user debit failed: {}", e);
                    }
                    // another instance spent it; the cached balance is stale
                    self.cache.invalidate_user_quota(user_id).await;
                    return Err(GatewayError::InsufficientUserQuota {
                        balance,
                        requested: quota,
                    });
                }
            }
        }
        self.cache.decrease_user_quota(user_id, quota).await;
        debug!(token_id, user_id, quota, "Quota reserved");
        self.remind_if_low(user_id, balance, balance - quota);
        Ok(reservation)
    }

    /// Reconciles a reservation against the true cost of the request
    ///
    /// Charges `actual - reserved`; a negative difference refunds.
    pub async fn post_consume(
        &self,
        reservation: &Reservation,
        actual: i64,
    ) -> Result<(), GatewayError> {
        self.apply_delta(
            reservation.token_id,
            reservation.user_id,
            reservation.unlimited,
            actual - reservation.amount,
        )
        .await
    }

    /// Applies a raw signed adjustment to a token and its owner
    ///
    /// Sufficiency is not checked again; the debt was already admitted.
    pub async fn post_consume_delta(&self, token_id: i64, delta: i64) -> Result<(), GatewayError> {
        let token = self
            .store
            .get_token(token_id)
            .await?
            .ok_or(GatewayError::TokenNotFound)?;
        self.apply_delta(token_id, token.user_id, token.unlimited_quota, delta)
            .await
    }

    async fn apply_delta(
        &self,
        token_id: i64,
        user_id: i64,
        unlimited: bool,
        delta: i64,
    ) -> Result<(), GatewayError> {
        if delta == 0 {
            return Ok(());
        }
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        match &self.coalescer {
            Some(coalescer) => {
                if !unlimited {
                    coalescer.add_delta(DeltaKind::TokenQuota, token_id, -delta);
                }
                coalescer.add_delta(DeltaKind::UserQuota, user_id, -delta);
                coalescer.add_delta(DeltaKind::UsedQuota, user_id, delta);
            }
            None => {
                if !unlimited {
                    self.store.add_token_quota(token_id, -delta, now()).await?;
                }
                self.store.add_user_quota(user_id, -delta).await?;
                self.store.add_user_used_quota(user_id, delta).await?;
            }
        }
        self.cache.decrease_user_quota(user_id, delta).await;
        debug!(token_id, user_id, delta, "Quota reconciled");
        Ok(())
    }

    /// Counts a finished request against its user and channel
    pub async fn record_usage(
        &self,
        user_id: i64,
        channel_id: i64,
        quota: i64,
    ) -> Result<(), GatewayError> {
        match &self.coalescer {
            Some(coalescer) => {
                coalescer.add_delta(DeltaKind::RequestCount, user_id, 1);
                coalescer.add_delta(DeltaKind::ChannelUsedQuota, channel_id, quota);
            }
            None => {
                self.store.add_user_request_count(user_id, 1).await?;
                if quota != 0 {
                    self.store.add_channel_used_quota(channel_id, quota).await?;
                }
            }
        }
        Ok(())
    }

    fn remind_if_low(&self, user_id: i64, before: i64, after: i64) {
        let threshold = self
            .cache
            .options()
            .i64_or(OPT_QUOTA_REMIND_THRESHOLD, self.remind_threshold);
        let running_low = before >= threshold && after < threshold;
        let exhausted = after <= 0;
        if !(running_low || exhausted) {
            return;
        }
        let subject = if exhausted {
            "Your quota has been used up"
        } else {
            "Your quota is running low"
        };
        let link = format!("{}/topup", self.server_address);
        let body = format!(
            "{}. Remaining balance: {}. Top up to keep your service running: <a href='{link}'>{link}</a>",
            subject,
            display_quota(after),
        );
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let email = match store.get_user(user_id).await {
                Ok(Some(User {
                    email: Some(email), ..
                })) if !email.is_empty() => email,
                Ok(_) => return,
                Err(e) => {
                    warn!(user_id, "Failed to load user for quota reminder: {}", e);
                    return;
                }
            };
            if let Err(e) = notifier.notify(&email, subject, &body).await {
                warn!(user_id, subject, "Failed to send quota reminder: {}", e);
            }
        });
    }
}
