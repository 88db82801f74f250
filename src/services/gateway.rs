use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    cache::{self, CacheLayer},
    config::GatewayConfig,
    error::GatewayError,
    persistence::{self, RecordStore},
    services::{
        FlushReport,
        coalescer::WriteCoalescer,
        health::{HealthMonitor, HealthSettings},
        ledger::{QuotaLedger, Reservation},
        log_pipeline::LogPipeline,
        notify::Notifier,
        probe::ProbeTransport,
        redemption::RedemptionService,
        sync::spawn_cache_sync,
    },
    types::{Channel, LogEntry, Token},
    utils::{display_quota, now},
};

/// A request let through by [`Gateway::admit`]
#[derive(Debug, Clone)]
pub struct Admission {
    pub token: Token,
    pub channel: Arc<Channel>,
    pub reservation: Reservation,
    pub model: String,
}

/// What a finished request actually cost
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub quota: i64,
}

/// Every control plane service wired together
pub struct Gateway {
    pub config: GatewayConfig,
    pub store: Arc<dyn RecordStore>,
    pub cache: Arc<CacheLayer>,
    pub coalescer: Option<Arc<WriteCoalescer>>,
    pub ledger: Arc<QuotaLedger>,
    pub logs: Arc<LogPipeline>,
    pub health: Arc<HealthMonitor>,
    pub redemptions: Arc<RedemptionService>,
}

impl Gateway {
    /// Connects the record store and cache backend named in `config`
    pub async fn connect(
        config: GatewayConfig,
        notifier: Arc<dyn Notifier>,
        transport: Arc<dyn ProbeTransport>,
    ) -> Result<Self, GatewayError> {
        let store = persistence::connect(&config).await?;
        let backend = cache::connect(&config).await?;
        let cache = Arc::new(CacheLayer::new(backend, store.clone(), &config));
        Ok(Self::new(config, store, cache, notifier, transport))
    }

    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn RecordStore>,
        cache: Arc<CacheLayer>,
        notifier: Arc<dyn Notifier>,
        transport: Arc<dyn ProbeTransport>,
    ) -> Self {
        let coalescer = config
            .batch_update_enabled
            .then(|| Arc::new(WriteCoalescer::new(store.clone())));
        let ledger = Arc::new(QuotaLedger::new(
            store.clone(),
            cache.clone(),
            coalescer.clone(),
            notifier.clone(),
            &config,
        ));
        let logs = Arc::new(LogPipeline::new(store.clone(), &config));
        let health = Arc::new(HealthMonitor::new(
            store.clone(),
            cache.clone(),
            transport,
            notifier,
            HealthSettings::from(&config),
        ));
        let redemptions = Arc::new(RedemptionService::new(
            store.clone(),
            cache.clone(),
            logs.clone(),
            ledger.clone(),
        ));
        Self {
            config,
            store,
            cache,
            coalescer,
            ledger,
            logs,
            health,
            redemptions,
        }
    }

    /// Validates the token, picks a channel and reserves `estimate`
    pub async fn admit(
        &self,
        token_key: &str,
        group: &str,
        model: &str,
        estimate: i64,
    ) -> Result<Admission, GatewayError> {
        let token = self.cache.validate_token(token_key, now()).await?;
        let channel = self.cache.roster().select(group, model)?;
        let reservation = self.ledger.pre_consume(token.id, estimate).await?;
        debug!(
            token_id = token.id,
            channel_id = channel.id,
            model,
            estimate,
            "Request admitted"
        );
        Ok(Admission {
            token,
            channel,
            reservation,
            model: model.to_string(),
        })
    }

    /// Charges the true cost of an admitted request and logs it
    pub async fn settle(&self, admission: &Admission, usage: Usage) -> Result<(), GatewayError> {
        let reservation = &admission.reservation;
        self.ledger.post_consume(reservation, usage.quota).await?;
        // the charge stands, so it still gets its log row
        if let Err(e) = self
            .ledger
            .record_usage(reservation.user_id, admission.channel.id, usage.quota)
            .await
        {
            warn!(
                user_id = reservation.user_id,
                channel_id = admission.channel.id,
                "Failed to record usage counters: {}",
                e
            );
        }
        let username = match self.store.get_user(reservation.user_id).await {
            Ok(Some(user)) => user.username,
            _ => String::new(),
        };
        self.logs
            .record_consume(LogEntry {
                user_id: reservation.user_id,
                content: format!("Charged {}", display_quota(usage.quota)),
                username,
                token_name: admission.token.name.clone(),
                model_name: admission.model.clone(),
                quota: usage.quota,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                channel_id: admission.channel.id,
                ..Default::default()
            })
            .await;
        Ok(())
    }

    /// Returns the whole reservation of a request that produced nothing
    pub async fn refund(&self, admission: &Admission) -> Result<(), GatewayError> {
        self.ledger.post_consume(&admission.reservation, 0).await
    }

    /// Starts the background loops; all of them stop once `shutdown` flips
    pub fn spawn_background(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![spawn_cache_sync(
            self.cache.clone(),
            self.config.sync_period(),
            shutdown.clone(),
        )];
        if let Some(coalescer) = &self.coalescer {
            handles.push(
                coalescer
                    .clone()
                    .spawn(self.config.batch_update_period(), shutdown.clone()),
            );
        }
        if self.logs.is_async() {
            handles.push(
                self.logs
                    .clone()
                    .spawn(self.config.async_log_period(), shutdown.clone()),
            );
        }
        if let Some(period) = self.config.channel_test_period() {
            handles.push(self.health.clone().spawn(period, shutdown.clone()));
        }
        info!(loops = handles.len(), "Background loops started");
        handles
    }

    /// Drains both write buffers right now
    pub async fn flush(&self) -> (FlushReport, FlushReport) {
        let deltas = match &self.coalescer {
            Some(coalescer) => coalescer.flush().await,
            None => FlushReport::default(),
        };
        (deltas, self.logs.flush().await)
    }
}
