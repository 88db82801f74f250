use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    error::GatewayError,
    persistence::RecordStore,
    types::{
        Channel, ChannelStatus, LogEntry, LogFilter, Redemption, RedemptionStatus, Token,
        TokenStatus, User, UserRole,
    },
};

#[derive(Default)]
struct Tables {
    channels: HashMap<i64, Channel>,
    tokens: HashMap<i64, Token>,
    users: HashMap<i64, User>,
    redemptions: HashMap<i64, Redemption>,
    logs: Vec<LogEntry>,
    options: HashMap<String, String>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process local record store
///
/// One mutex guards every table, so each operation is its own transaction.
/// Used for single process deployments without a database and as the test
/// fixture, with hooks to inject write failures.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
    failing_ops: Mutex<HashSet<&'static str>>,
    fail_log_inserts: AtomicUsize,
    log_insert_calls: AtomicUsize,
}

fn injected(op: &'static str) -> GatewayError {
    GatewayError::storage(op, std::io::Error::other("injected failure"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_write(&self, op: &'static str) -> Result<(), GatewayError> {
        let op_fails = self
            .failing_ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(op);
        if op_fails || self.fail_writes.load(Ordering::Relaxed) {
            return Err(injected(op));
        }
        Ok(())
    }

    /// Makes one named operation fail until [`MemoryStore::fail_writes`] is
    /// switched off
    pub fn fail_op(&self, op: &'static str) {
        self.failing_ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
    }

    /// Makes every mutating operation fail until switched off
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
        if !fail {
            self.failing_ops
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    /// Makes the next `count` log inserts fail
    pub fn fail_next_log_inserts(&self, count: usize) {
        self.fail_log_inserts.store(count, Ordering::Relaxed);
    }

    /// Number of `insert_logs` calls seen so far, failed ones included
    pub fn log_insert_calls(&self) -> usize {
        self.log_insert_calls.load(Ordering::Relaxed)
    }

    /// Number of stored log rows
    pub fn log_count(&self) -> usize {
        self.lock().logs.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, GatewayError> {
        let mut channels = self.lock().channels.values().cloned().collect::<Vec<_>>();
        channels.sort_by_key(|c| c.id);
        Ok(channels)
    }

    async fn get_channel(&self, id: i64) -> Result<Option<Channel>, GatewayError> {
        Ok(self.lock().channels.get(&id).cloned())
    }

    async fn insert_channels(&self, channels: Vec<Channel>) -> Result<Vec<i64>, GatewayError> {
        self.check_write("insert_channels")?;
        let mut tables = self.lock();
        let mut ids = Vec::with_capacity(channels.len());
        for mut channel in channels {
            channel.id = tables.next_id();
            ids.push(channel.id);
            tables.channels.insert(channel.id, channel);
        }
        Ok(ids)
    }

    async fn update_channel_status(
        &self,
        id: i64,
        status: ChannelStatus,
        reason: Option<String>,
    ) -> Result<(), GatewayError> {
        self.check_write("update_channel_status")?;
        if let Some(channel) = self.lock().channels.get_mut(&id) {
            channel.status = status;
            channel.disabled_reason = reason;
        }
        Ok(())
    }

    async fn update_channel_test_result(
        &self,
        id: i64,
        response_time_ms: i64,
        tested_at: i64,
    ) -> Result<(), GatewayError> {
        self.check_write("update_channel_test_result")?;
        if let Some(channel) = self.lock().channels.get_mut(&id) {
            channel.response_time_ms = response_time_ms;
            channel.test_time = tested_at;
        }
        Ok(())
    }

    async fn update_channel_balance(
        &self,
        id: i64,
        balance: f64,
        updated_at: i64,
    ) -> Result<(), GatewayError> {
        self.check_write("update_channel_balance")?;
        if let Some(channel) = self.lock().channels.get_mut(&id) {
            channel.balance = balance;
            channel.balance_updated_at = updated_at;
        }
        Ok(())
    }

    async fn add_channel_used_quota(&self, id: i64, delta: i64) -> Result<(), GatewayError> {
        self.check_write("add_channel_used_quota")?;
        if let Some(channel) = self.lock().channels.get_mut(&id) {
            channel.used_quota += delta;
        }
        Ok(())
    }

    async fn delete_channels_by_status(
        &self,
        statuses: &[ChannelStatus],
    ) -> Result<u64, GatewayError> {
        self.check_write("delete_channels_by_status")?;
        let mut tables = self.lock();
        let before = tables.channels.len();
        tables.channels.retain(|_, c| !statuses.contains(&c.status));
        Ok((before - tables.channels.len()) as u64)
    }

    async fn insert_token(&self, mut token: Token) -> Result<i64, GatewayError> {
        self.check_write("insert_token")?;
        let mut tables = self.lock();
        if tables.tokens.values().any(|t| t.key == token.key) {
            return Err(GatewayError::BadRequest {
                msg: "duplicate token key",
            });
        }
        token.id = tables.next_id();
        let id = token.id;
        tables.tokens.insert(id, token);
        Ok(id)
    }

    async fn get_token(&self, id: i64) -> Result<Option<Token>, GatewayError> {
        Ok(self.lock().tokens.get(&id).cloned())
    }

    async fn get_token_by_key(&self, key: &str) -> Result<Option<Token>, GatewayError> {
        Ok(self.lock().tokens.values().find(|t| t.key == key).cloned())
    }

    async fn update_token_status(
        &self,
        id: i64,
        status: TokenStatus,
        accessed_at: i64,
    ) -> Result<(), GatewayError> {
        self.check_write("update_token_status")?;
        if let Some(token) = self.lock().tokens.get_mut(&id) {
            token.status = status;
            token.accessed_time = accessed_at;
        }
        Ok(())
    }

    async fn add_token_quota(
        &self,
        id: i64,
        delta: i64,
        accessed_at: i64,
    ) -> Result<(), GatewayError> {
        self.check_write("add_token_quota")?;
        if let Some(token) = self.lock().tokens.get_mut(&id) {
            token.remain_quota += delta;
            token.used_quota -= delta;
            token.accessed_time = accessed_at;
        }
        Ok(())
    }

    async fn try_debit_token(
        &self,
        id: i64,
        amount: i64,
        accessed_at: i64,
    ) -> Result<bool, GatewayError> {
        self.check_write("try_debit_token")?;
        let mut tables = self.lock();
        let Some(token) = tables.tokens.get_mut(&id) else {
            return Ok(false);
        };
        if token.remain_quota < amount {
            return Ok(false);
        }
        token.remain_quota -= amount;
        token.used_quota += amount;
        token.accessed_time = accessed_at;
        Ok(true)
    }

    async fn insert_user(&self, mut user: User) -> Result<i64, GatewayError> {
        self.check_write("insert_user")?;
        let mut tables = self.lock();
        user.id = tables.next_id();
        let id = user.id;
        tables.users.insert(id, user);
        Ok(id)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, GatewayError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn add_user_quota(&self, id: i64, delta: i64) -> Result<(), GatewayError> {
        self.check_write("add_user_quota")?;
        if let Some(user) = self.lock().users.get_mut(&id) {
            user.quota += delta;
        }
        Ok(())
    }

    async fn add_user_used_quota(&self, id: i64, delta: i64) -> Result<(), GatewayError> {
        self.check_write("add_user_used_quota")?;
        if let Some(user) = self.lock().users.get_mut(&id) {
            user.used_quota += delta;
        }
        Ok(())
    }

    async fn add_user_request_count(&self, id: i64, delta: i64) -> Result<(), GatewayError> {
        self.check_write("add_user_request_count")?;
        if let Some(user) = self.lock().users.get_mut(&id) {
            user.request_count += delta;
        }
        Ok(())
    }

    async fn try_debit_user(&self, id: i64, amount: i64) -> Result<bool, GatewayError> {
        self.check_write("try_debit_user")?;
        let mut tables = self.lock();
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(false);
        };
        if user.quota < amount {
            return Ok(false);
        }
        user.quota -= amount;
        user.used_quota += amount;
        Ok(true)
    }

    async fn count_users(&self) -> Result<u64, GatewayError> {
        Ok(self.lock().users.len() as u64)
    }

    async fn root_user_email(&self) -> Result<Option<String>, GatewayError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.role == UserRole::Root)
            .and_then(|u| u.email.clone()))
    }

    async fn insert_redemptions(
        &self,
        redemptions: Vec<Redemption>,
    ) -> Result<Vec<i64>, GatewayError> {
        self.check_write("insert_redemptions")?;
        let mut tables = self.lock();
        let mut ids = Vec::with_capacity(redemptions.len());
        for mut redemption in redemptions {
            redemption.id = tables.next_id();
            ids.push(redemption.id);
            tables.redemptions.insert(redemption.id, redemption);
        }
        Ok(ids)
    }

    async fn get_redemption_by_key(&self, key: &str) -> Result<Option<Redemption>, GatewayError> {
        Ok(self
            .lock()
            .redemptions
            .values()
            .find(|r| r.key == key)
            .cloned())
    }

    async fn redeem(&self, key: &str, user_id: i64, now: i64) -> Result<i64, GatewayError> {
        self.check_write("redeem")?;
        let mut guard = self.lock();
        let tables = &mut *guard;
        let redemption = tables
            .redemptions
            .values_mut()
            .find(|r| r.key == key)
            .ok_or(GatewayError::RedemptionNotFound)?;
        if redemption.status != RedemptionStatus::Enabled {
            return Err(GatewayError::RedemptionAlreadyUsed);
        }
        if !tables.users.contains_key(&user_id) {
            return Err(GatewayError::UserNotFound { id: user_id });
        }
        redemption.status = RedemptionStatus::Used;
        redemption.user_id = Some(user_id);
        redemption.redeemed_time = now;
        let quota = redemption.quota;
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.quota += quota;
        }
        Ok(quota)
    }

    async fn insert_logs(&self, logs: &[LogEntry]) -> Result<(), GatewayError> {
        self.log_insert_calls.fetch_add(1, Ordering::Relaxed);
        let injected_failure = self
            .fail_log_inserts
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if injected_failure {
            return Err(injected("insert_logs"));
        }
        self.check_write("insert_logs")?;
        let mut tables = self.lock();
        for log in logs {
            let mut log = log.clone();
            log.id = tables.next_id();
            tables.logs.push(log);
        }
        Ok(())
    }

    async fn list_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, GatewayError> {
        let tables = self.lock();
        let mut logs = tables
            .logs
            .iter()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect::<Vec<_>>();
        logs.sort_by(|a, b| b.id.cmp(&a.id));
        let limit = if filter.limit == 0 {
            usize::MAX
        } else {
            filter.limit as usize
        };
        Ok(logs
            .into_iter()
            .skip(filter.offset as usize)
            .take(limit)
            .collect())
    }

    async fn delete_logs_before(&self, timestamp: i64) -> Result<u64, GatewayError> {
        self.check_write("delete_logs_before")?;
        let mut tables = self.lock();
        let before = tables.logs.len();
        tables.logs.retain(|l| l.created_at >= timestamp);
        Ok((before - tables.logs.len()) as u64)
    }

    async fn sum_used_quota(&self, filter: &LogFilter) -> Result<i64, GatewayError> {
        let filter = filter.consumption();
        Ok(self
            .lock()
            .logs
            .iter()
            .filter(|l| filter.matches(l))
            .map(|l| l.quota)
            .sum())
    }

    async fn sum_used_tokens(&self, filter: &LogFilter) -> Result<i64, GatewayError> {
        let filter = filter.consumption();
        Ok(self
            .lock()
            .logs
            .iter()
            .filter(|l| filter.matches(l))
            .map(|l| l.prompt_tokens + l.completion_tokens)
            .sum())
    }

    async fn load_options(&self) -> Result<HashMap<String, String>, GatewayError> {
        Ok(self.lock().options.clone())
    }

    async fn set_option(&self, key: &str, value: &str) -> Result<(), GatewayError> {
        self.check_write("set_option")?;
        self.lock()
            .options
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
