//! Shared fixtures: an in-memory gateway, a scripted probe transport and a
//! notifier that remembers what it sent.

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use quotagate::{
    cache::{CacheLayer, LocalCache},
    config::GatewayConfig,
    error::GatewayError,
    persistence::{MemoryStore, RecordStore},
    services::{Gateway, Notifier, ProbeError, ProbeResponse, ProbeTransport},
    types::{Token, User},
};

/// Replays queued probe results per channel, answering healthy when empty
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<i64, VecDeque<Result<ProbeResponse, ProbeError>>>>,
    delay: Mutex<Option<Duration>>,
    pub calls: Mutex<Vec<i64>>,
}

impl ScriptedTransport {
    pub fn push(&self, channel_id: i64, result: Result<ProbeResponse, ProbeError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(channel_id)
            .or_default()
            .push_back(result);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

pub fn healthy() -> Result<ProbeResponse, ProbeError> {
    Ok(ProbeResponse {
        status: 200,
        completion_tokens: 1,
        error: None,
    })
}

pub fn unauthorized() -> Result<ProbeResponse, ProbeError> {
    Ok(ProbeResponse {
        status: 401,
        completion_tokens: 0,
        error: None,
    })
}

#[async_trait]
impl ProbeTransport for ScriptedTransport {
    async fn probe(
        &self,
        channel: &quotagate::types::Channel,
    ) -> Result<ProbeResponse, ProbeError> {
        self.calls.lock().unwrap().push(channel.id);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&channel.id)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(healthy)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &str, subject: &str, _body: &str) -> Result<(), GatewayError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), subject.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<ScriptedTransport>,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: Arc<Gateway>,
}

/// Test config: no probe spacing, no latency check, root email set
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default().with_admin_password("admin-secret");
    config.probe_interval = 0;
    config.channel_disable_threshold = 0.0;
    config.root_email = Some("root@example.com".into());
    config
}

pub fn harness(config: GatewayConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(ScriptedTransport::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let cache = Arc::new(CacheLayer::new(
        Arc::new(LocalCache::new(1024)),
        store.clone(),
        &config,
    ));
    let gateway = Arc::new(Gateway::new(
        config,
        store.clone(),
        cache,
        notifier.clone(),
        transport.clone(),
    ));
    Harness {
        store,
        transport,
        notifier,
        gateway,
    }
}

/// Inserts a user with `balance` and one token, returning (user id, token id)
pub async fn user_with_token(
    store: &MemoryStore,
    balance: i64,
    token: Token,
) -> (i64, i64) {
    let user_id = store
        .insert_user(User {
            username: format!("user-{balance}"),
            email: Some("user@example.com".into()),
            quota: balance,
            ..Default::default()
        })
        .await
        .unwrap();
    let token_id = store
        .insert_token(Token { user_id, ..token })
        .await
        .unwrap();
    (user_id, token_id)
}
