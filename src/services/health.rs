use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use serde::Serialize;
use strum::IntoStaticStr;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    cache::CacheLayer,
    config::{
        GatewayConfig, OPT_AUTO_DISABLE_CHANNEL, OPT_AUTO_ENABLE_CHANNEL,
        OPT_CHANNEL_DISABLE_THRESHOLD,
    },
    error::GatewayError,
    persistence::RecordStore,
    services::{
        notify::{Notifier, notify_detached},
        probe::{ProbeError, ProbeResponse, ProbeTransport},
    },
    types::{Channel, ChannelStatus},
    utils::now,
};

/// Verdict on one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, IntoStaticStr)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProbeOutcome {
    Healthy,
    /// Counts toward auto disable
    Fatal(String),
    /// Says nothing about the channel either way
    Transient(String),
}

const FATAL_ERROR_CODES: [&str; 2] = ["invalid_api_key", "account_deactivated"];
const FATAL_ERROR_TYPES: [&str; 1] = ["insufficient_quota"];

/// Maps a probe result onto [`ProbeOutcome`]
///
/// | result                                        | outcome   |
/// |-----------------------------------------------|-----------|
/// | error code `invalid_api_key` / `account_deactivated` | fatal |
/// | error type `insufficient_quota`               | fatal     |
/// | HTTP 401 or 403                               | fatal     |
/// | HTTP 429 or 5xx                               | transient |
/// | any other upstream error                      | transient |
/// | success with zero completion tokens           | fatal     |
/// | success with completion tokens                | healthy   |
/// | timeout                                       | fatal     |
/// | malformed body, misconfigured channel         | fatal     |
/// | connect or other transport error              | transient |
/// | provider type without probe support           | transient |
pub fn classify(result: &Result<ProbeResponse, ProbeError>) -> ProbeOutcome {
    let response = match result {
        Ok(response) => response,
        Err(e @ (ProbeError::Timeout | ProbeError::Malformed { .. } | ProbeError::Misconfigured { .. })) => {
            return ProbeOutcome::Fatal(e.to_string());
        }
        Err(e) => return ProbeOutcome::Transient(e.to_string()),
    };
    if let Some(err) = &response.error {
        let detail = format!(
            "status {}, type {}, code {}, message {}",
            response.status, err.kind, err.code, err.message
        );
        if FATAL_ERROR_CODES.contains(&err.code.as_str())
            || FATAL_ERROR_TYPES.contains(&err.kind.as_str())
            || matches!(response.status, 401 | 403)
        {
            return ProbeOutcome::Fatal(detail);
        }
        return ProbeOutcome::Transient(detail);
    }
    match response.status {
        401 | 403 => ProbeOutcome::Fatal(format!("status {}", response.status)),
        429 | 500.. => ProbeOutcome::Transient(format!("status {}", response.status)),
        400..=499 => ProbeOutcome::Transient(format!("status {}", response.status)),
        _ if response.completion_tokens == 0 => {
            ProbeOutcome::Fatal("response carried no completion tokens".to_string())
        }
        _ => ProbeOutcome::Healthy,
    }
}

/// Status change applied after a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: ChannelStatus,
    pub to: ChannelStatus,
}

/// Result of probing one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub channel_id: i64,
    pub latency_ms: i64,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
    pub transition: Option<Transition>,
}

/// Totals of one sweep over all channels
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub tested: usize,
    pub healthy: usize,
    pub fatal: usize,
    pub transient: usize,
    pub disabled: usize,
    pub enabled: usize,
}

impl SweepReport {
    fn add(&mut self, report: &ProbeReport) {
        self.tested += 1;
        match report.outcome {
            ProbeOutcome::Healthy => self.healthy += 1,
            ProbeOutcome::Fatal(_) => self.fatal += 1,
            ProbeOutcome::Transient(_) => self.transient += 1,
        }
        match report.transition.map(|t| t.to) {
            Some(ChannelStatus::AutoDisabled) => self.disabled += 1,
            Some(ChannelStatus::Enabled) => self.enabled += 1,
            _ => {}
        }
    }
}

/// Startup settings of the health monitor
#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub latency_threshold: Option<Duration>,
    pub disable_after: u32,
    pub auto_disable: bool,
    pub auto_enable: bool,
    pub probe_timeout: Duration,
    pub probe_interval: Duration,
    pub root_email: Option<String>,
}

impl From<&GatewayConfig> for HealthSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            latency_threshold: config.latency_threshold(),
            disable_after: config.channel_disable_after.max(1),
            auto_disable: config.automatic_disable_channel,
            auto_enable: config.automatic_enable_channel,
            probe_timeout: config.probe_timeout(),
            probe_interval: config.probe_interval(),
            root_email: config.root_email.clone(),
        }
    }
}

/// Probes channels and moves them between enabled and auto disabled
///
/// Manually disabled channels are probed for latency bookkeeping but never
/// change status here. At most one sweep runs at a time; a second request
/// fails with [`GatewayError::SweepInProgress`].
pub struct HealthMonitor {
    store: Arc<dyn RecordStore>,
    cache: Arc<CacheLayer>,
    transport: Arc<dyn ProbeTransport>,
    notifier: Arc<dyn Notifier>,
    settings: HealthSettings,
    failures: Mutex<HashMap<i64, u32>>,
    sweep_lock: Arc<tokio::sync::Mutex<()>>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<CacheLayer>,
        transport: Arc<dyn ProbeTransport>,
        notifier: Arc<dyn Notifier>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            store,
            cache,
            transport,
            notifier,
            settings,
            failures: Mutex::new(HashMap::new()),
            sweep_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweep_lock.try_lock().is_err()
    }

    fn latency_threshold(&self) -> Option<Duration> {
        let default = self
            .settings
            .latency_threshold
            .map_or(0.0, |d| d.as_secs_f64());
        let secs = self
            .cache
            .options()
            .f64_or(OPT_CHANNEL_DISABLE_THRESHOLD, default);
        if secs > 0.0 {
            Duration::try_from_secs_f64(secs).ok()
        } else {
            None
        }
    }

    fn auto_disable(&self) -> bool {
        self.cache
            .options()
            .bool_or(OPT_AUTO_DISABLE_CHANNEL, self.settings.auto_disable)
    }

    fn auto_enable(&self) -> bool {
        self.cache
            .options()
            .bool_or(OPT_AUTO_ENABLE_CHANNEL, self.settings.auto_enable)
    }

    /// Consecutive fatal probes recorded for a channel
    pub fn consecutive_failures(&self, channel_id: i64) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel_id)
            .copied()
            .unwrap_or(0)
    }

    fn bump_failures(&self, channel_id: i64) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(channel_id).or_insert(0);
        *count += 1;
        *count
    }

    fn reset_failures(&self, channel_id: i64) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&channel_id);
    }

    /// Probes one channel by id and applies the resulting transition
    pub async fn test_channel(&self, id: i64) -> Result<ProbeReport, GatewayError> {
        let channel = self
            .store
            .get_channel(id)
            .await?
            .ok_or(GatewayError::ChannelNotFound { id })?;
        Ok(self.check(&channel).await)
    }

    async fn check(&self, channel: &Channel) -> ProbeReport {
        let start = Instant::now();
        let result = match tokio::time::timeout(
            self.settings.probe_timeout,
            self.transport.probe(channel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout),
        };
        let latency = start.elapsed();
        let mut outcome = classify(&result);
        if result.is_ok()
            && channel.is_enabled()
            && let Some(threshold) = self.latency_threshold()
            && latency > threshold
        {
            outcome = ProbeOutcome::Fatal(format!(
                "response time {:.2}s exceeds threshold {:.2}s",
                latency.as_secs_f64(),
                threshold.as_secs_f64()
            ));
        }
        let latency_ms = i64::try_from(latency.as_millis()).unwrap_or(i64::MAX);
        if let Err(e) = self
            .store
            .update_channel_test_result(channel.id, latency_ms, now())
            .await
        {
            warn!(channel_id = channel.id, "Failed to record probe latency: {}", e);
        }
        let transition = self.apply(channel, &outcome).await;
        debug!(
            channel_id = channel.id,
            latency_ms,
            outcome = <&'static str>::from(&outcome),
            "Channel probed"
        );
        ProbeReport {
            channel_id: channel.id,
            latency_ms,
            outcome,
            transition,
        }
    }

    async fn apply(&self, channel: &Channel, outcome: &ProbeOutcome) -> Option<Transition> {
        match (channel.status, outcome) {
            (ChannelStatus::Enabled, ProbeOutcome::Fatal(reason)) => {
                let failures = self.bump_failures(channel.id);
                if !self.auto_disable() || failures < self.settings.disable_after {
                    return None;
                }
                self.transition(channel, ChannelStatus::AutoDisabled, Some(reason))
                    .await
            }
            (ChannelStatus::Enabled, ProbeOutcome::Healthy) => {
                self.reset_failures(channel.id);
                None
            }
            (ChannelStatus::AutoDisabled, ProbeOutcome::Healthy) => {
                self.reset_failures(channel.id);
                if !self.auto_enable() {
                    return None;
                }
                self.transition(channel, ChannelStatus::Enabled, None).await
            }
            _ => None,
        }
    }

    async fn transition(
        &self,
        channel: &Channel,
        to: ChannelStatus,
        reason: Option<&str>,
    ) -> Option<Transition> {
        let reason = reason.map(|r| if r.trim().is_empty() { "unknown failure" } else { r });
        if let Err(e) = self
            .store
            .update_channel_status(channel.id, to, reason.map(ToOwned::to_owned))
            .await
        {
            error!(channel_id = channel.id, %to, "Failed to update channel status: {}", e);
            return None;
        }
        self.reset_failures(channel.id);
        self.cache.set_channel_status(channel.id, to, reason);
        let (subject, body) = match to {
            ChannelStatus::AutoDisabled => {
                warn!(channel_id = channel.id, reason, "Channel disabled");
                (
                    format!("Channel \"{}\" (#{}) has been disabled", channel.name, channel.id),
                    format!(
                        "Channel \"{}\" (#{}) was disabled automatically, reason: {}",
                        channel.name,
                        channel.id,
                        reason.unwrap_or_default()
                    ),
                )
            }
            _ => {
                info!(channel_id = channel.id, "Channel enabled");
                (
                    format!("Channel \"{}\" (#{}) has been enabled", channel.name, channel.id),
                    format!(
                        "Channel \"{}\" (#{}) passed its health check and was enabled again",
                        channel.name, channel.id
                    ),
                )
            }
        };
        self.notify_root(subject, body).await;
        Some(Transition {
            from: channel.status,
            to,
        })
    }

    async fn notify_root(&self, subject: String, body: String) {
        let recipient = match &self.settings.root_email {
            Some(email) => Some(email.clone()),
            None => self.store.root_user_email().await.unwrap_or_else(|e| {
                warn!("Failed to look up root email: {}", e);
                None
            }),
        };
        match recipient.filter(|r| !r.is_empty()) {
            Some(recipient) => {
                notify_detached(self.notifier.clone(), recipient, subject, body);
            }
            None => debug!(subject = %subject, "No root email configured, notification skipped"),
        }
    }

    /// Probes every channel now, rejecting if a sweep is already running
    pub async fn run_sweep(&self, notify: bool) -> Result<SweepReport, GatewayError> {
        let _guard = self
            .sweep_lock
            .try_lock()
            .map_err(|_| GatewayError::SweepInProgress)?;
        self.sweep(notify).await
    }

    /// Starts a sweep in the background, rejecting if one is already running
    pub fn test_all(self: &Arc<Self>, notify: bool) -> Result<(), GatewayError> {
        let guard = self
            .sweep_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| GatewayError::SweepInProgress)?;
        let monitor = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = monitor.sweep(notify).await {
                error!("Channel sweep failed: {}", e);
            }
        });
        Ok(())
    }

    async fn sweep(&self, notify: bool) -> Result<SweepReport, GatewayError> {
        let channels = self.store.list_channels().await?;
        let mut report = SweepReport::default();
        for (i, channel) in channels.iter().enumerate() {
            if i > 0 && !self.settings.probe_interval.is_zero() {
                tokio::time::sleep(self.settings.probe_interval).await;
            }
            report.add(&self.check(channel).await);
        }
        info!(
            tested = report.tested,
            disabled = report.disabled,
            enabled = report.enabled,
            "Channel sweep finished"
        );
        if notify {
            self.notify_root(
                "Channel test finished".to_string(),
                format!(
                    "Tested {} channels: {} healthy, {} failed, {} inconclusive. {} disabled, {} enabled.",
                    report.tested,
                    report.healthy,
                    report.fatal,
                    report.transient,
                    report.disabled,
                    report.enabled
                ),
            )
            .await;
        }
        Ok(report)
    }

    /// Sweeps every `period` until `shutdown` fires; these sweeps never notify
    pub fn spawn(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match self.run_sweep(false).await {
                            Ok(_) => {}
                            Err(GatewayError::SweepInProgress) => debug!("Sweep already running, tick skipped"),
                            Err(e) => error!("Scheduled channel sweep failed: {}", e),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            info!("Channel health monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::probe::UpstreamError;

    fn response(status: u16, tokens: u64) -> Result<ProbeResponse, ProbeError> {
        Ok(ProbeResponse {
            status,
            completion_tokens: tokens,
            error: None,
        })
    }

    fn upstream(status: u16, kind: &str, code: &str) -> Result<ProbeResponse, ProbeError> {
        Ok(ProbeResponse {
            status,
            completion_tokens: 0,
            error: Some(UpstreamError {
                message: "x".into(),
                kind: kind.into(),
                code: code.into(),
            }),
        })
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify(&response(200, 1)), ProbeOutcome::Healthy);
        assert!(matches!(classify(&response(200, 0)), ProbeOutcome::Fatal(_)));
        assert!(matches!(classify(&response(401, 0)), ProbeOutcome::Fatal(_)));
        assert!(matches!(classify(&response(429, 0)), ProbeOutcome::Transient(_)));
        assert!(matches!(classify(&response(503, 0)), ProbeOutcome::Transient(_)));
        assert!(matches!(
            classify(&upstream(400, "invalid_request_error", "invalid_api_key")),
            ProbeOutcome::Fatal(_)
        ));
        assert!(matches!(
            classify(&upstream(429, "insufficient_quota", "")),
            ProbeOutcome::Fatal(_)
        ));
        assert!(matches!(
            classify(&upstream(404, "invalid_request_error", "model_not_found")),
            ProbeOutcome::Transient(_)
        ));
        assert!(matches!(
            classify(&Err(ProbeError::Timeout)),
            ProbeOutcome::Fatal(_)
        ));
        assert!(matches!(
            classify(&Err(ProbeError::Connect {
                msg: "dns".into()
            })),
            ProbeOutcome::Transient(_)
        ));
        assert!(matches!(
            classify(&Err(ProbeError::Unsupported {
                channel_type: crate::types::ChannelType::Baidu
            })),
            ProbeOutcome::Transient(_)
        ));
    }

    #[test]
    fn fatal_reason_is_never_empty() {
        for result in [response(200, 0), response(403, 0), Err(ProbeError::Timeout)] {
            match classify(&result) {
                ProbeOutcome::Fatal(reason) => assert!(!reason.is_empty()),
                other => panic!("expected fatal, got {other:?}"),
            }
        }
    }
}
