pub mod conn;
pub mod entities;
pub mod metrics;
pub mod repo;

use std::{collections::HashMap, future::Future, time::Instant};

use async_trait::async_trait;
use sea_orm::{
    ActiveValue::Set,
    ColumnTrait, Condition, ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    sea_query::{Alias, Expr, Func, OnConflict, SimpleExpr},
};
use serde_json::{Value, json};

use crate::{
    error::GatewayError,
    persistence::RecordStore,
    types::{
        Channel, ChannelStatus, LogEntry, LogFilter, LogType, Redemption, RedemptionStatus, Token,
        TokenStatus, User, UserRole,
    },
};

use entities::*;
use metrics::WriteMetrics;
use repo::*;

/// Record store over a SQL database through sea-orm
pub struct DbStore {
    db: DatabaseConnection,
    metrics: WriteMetrics,
}

impl DbStore {
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        Ok(Self::from_connection(conn::connect(url).await?))
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self {
            db,
            metrics: WriteMetrics::default(),
        }
    }

    /// Runs one write and records its latency or failure
    async fn track<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, DbErr>>,
    ) -> Result<T, GatewayError> {
        let start = Instant::now();
        match fut.await {
            Ok(v) => {
                self.metrics.record_ok(start);
                Ok(v)
            }
            Err(e) => {
                self.metrics.record_err(&e);
                Err(GatewayError::storage(op, e))
            }
        }
    }

    /// Evaluates an aggregate over the consume logs matching `filter`
    async fn sum_logs(
        &self,
        op: &'static str,
        filter: &LogFilter,
        total: SimpleExpr,
    ) -> Result<i64, GatewayError> {
        // SUM over BIGINT is NUMERIC on postgres; MySQL only casts to SIGNED
        let int_type = match self.db.get_database_backend() {
            DatabaseBackend::MySql => "SIGNED",
            _ => "BIGINT",
        };
        let total = EntityLog::find()
            .select_only()
            .column_as(
                SimpleExpr::from(Func::cast_as(total, Alias::new(int_type))),
                "total",
            )
            .filter(log_condition(&filter.consumption()))
            .into_tuple::<i64>()
            .one(&self.db)
            .await
            .map_err(|e| GatewayError::storage(op, e))?;
        Ok(total.unwrap_or(0))
    }
}

fn coalesced_sum(col: ColumnLog) -> SimpleExpr {
    Func::coalesce([Expr::col(col).sum(), Expr::val(0).into()]).into()
}

fn log_condition(filter: &LogFilter) -> Condition {
    let mut cond = Condition::all();
    if let Some(kind) = filter.kind.filter(|k| *k != LogType::Unknown) {
        cond = cond.add(ColumnLog::Kind.eq(kind.code()));
    }
    if let Some(user_id) = filter.user_id {
        cond = cond.add(ColumnLog::UserId.eq(user_id));
    }
    if let Some(username) = filter.username.as_deref() {
        cond = cond.add(ColumnLog::Username.eq(username));
    }
    if let Some(model) = filter.model_name.as_deref() {
        cond = cond.add(ColumnLog::ModelName.eq(model));
    }
    if let Some(token) = filter.token_name.as_deref() {
        cond = cond.add(ColumnLog::TokenName.eq(token));
    }
    if let Some(channel_id) = filter.channel_id {
        cond = cond.add(ColumnLog::ChannelId.eq(channel_id));
    }
    if let Some(start) = filter.start {
        cond = cond.add(ColumnLog::CreatedAt.gte(start));
    }
    if let Some(end) = filter.end {
        cond = cond.add(ColumnLog::CreatedAt.lte(end));
    }
    cond
}

#[async_trait]
impl RecordStore for DbStore {
    fn backend(&self) -> &'static str {
        "db"
    }

    async fn status(&self) -> Value {
        let start = Instant::now();
        let (healthy, error, latency_ms) = match self.db.ping().await {
            Ok(()) => (true, None, Some(start.elapsed().as_millis())),
            Err(e) => (false, Some(e.to_string()), None),
        };
        json!({
            "backend": self.backend(),
            "healthy": healthy,
            "latency_ms": latency_ms,
            "error": error,
            "writes": self.metrics.snapshot(),
        })
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, GatewayError> {
        let rows = EntityChannel::find()
            .order_by_asc(ColumnChannel::Id)
            .all(&self.db)
            .await
            .map_err(|e| GatewayError::storage("list_channels", e))?;
        Ok(rows.into_iter().map(channel_from_row).collect())
    }

    async fn get_channel(&self, id: i64) -> Result<Option<Channel>, GatewayError> {
        let row = EntityChannel::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(|e| GatewayError::storage("get_channel", e))?;
        Ok(row.map(channel_from_row))
    }

    async fn insert_channels(&self, channels: Vec<Channel>) -> Result<Vec<i64>, GatewayError> {
        self.track("insert_channels", async {
            let txn = self.db.begin().await?;
            let mut ids = Vec::with_capacity(channels.len());
            for channel in channels {
                let res = EntityChannel::insert(channel_to_active(channel))
                    .exec(&txn)
                    .await?;
                ids.push(res.last_insert_id);
            }
            txn.commit().await?;
            Ok(ids)
        })
        .await
    }

    async fn update_channel_status(
        &self,
        id: i64,
        status: ChannelStatus,
        reason: Option<String>,
    ) -> Result<(), GatewayError> {
        self.track(
            "update_channel_status",
            EntityChannel::update_many()
                .col_expr(ColumnChannel::Status, Expr::value(status.code()))
                .col_expr(ColumnChannel::DisabledReason, Expr::value(reason))
                .filter(ColumnChannel::Id.eq(id))
                .exec(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn update_channel_test_result(
        &self,
        id: i64,
        response_time_ms: i64,
        tested_at: i64,
    ) -> Result<(), GatewayError> {
        self.track(
            "update_channel_test_result",
            EntityChannel::update_many()
                .col_expr(ColumnChannel::ResponseTime, Expr::value(response_time_ms))
                .col_expr(ColumnChannel::TestTime, Expr::value(tested_at))
                .filter(ColumnChannel::Id.eq(id))
                .exec(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn update_channel_balance(
        &self,
        id: i64,
        balance: f64,
        updated_at: i64,
    ) -> Result<(), GatewayError> {
        self.track(
            "update_channel_balance",
            EntityChannel::update_many()
                .col_expr(ColumnChannel::Balance, Expr::value(balance))
                .col_expr(ColumnChannel::BalanceUpdatedAt, Expr::value(updated_at))
                .filter(ColumnChannel::Id.eq(id))
                .exec(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn add_channel_used_quota(&self, id: i64, delta: i64) -> Result<(), GatewayError> {
        self.track(
            "add_channel_used_quota",
            EntityChannel::update_many()
                .col_expr(
                    ColumnChannel::UsedQuota,
                    Expr::col(ColumnChannel::UsedQuota).add(delta),
                )
                .filter(ColumnChannel::Id.eq(id))
                .exec(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn delete_channels_by_status(
        &self,
        statuses: &[ChannelStatus],
    ) -> Result<u64, GatewayError> {
        let codes = statuses.iter().map(|s| s.code()).collect::<Vec<_>>();
        let res = self
            .track(
                "delete_channels_by_status",
                EntityChannel::delete_many()
                    .filter(ColumnChannel::Status.is_in(codes))
                    .exec(&self.db),
            )
            .await?;
        Ok(res.rows_affected)
    }

    async fn insert_token(&self, token: Token) -> Result<i64, GatewayError> {
        let res = self
            .track(
                "insert_token",
                EntityToken::insert(token_to_active(token)).exec(&self.db),
            )
            .await?;
        Ok(res.last_insert_id)
    }

    async fn get_token(&self, id: i64) -> Result<Option<Token>, GatewayError> {
        let row = EntityToken::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(|e| GatewayError::storage("get_token", e))?;
        Ok(row.map(token_from_row))
    }

    async fn get_token_by_key(&self, key: &str) -> Result<Option<Token>, GatewayError> {
        let row = EntityToken::find()
            .filter(ColumnToken::Key.eq(key))
            .one(&self.db)
            .await
            .map_err(|e| GatewayError::storage("get_token_by_key", e))?;
        Ok(row.map(token_from_row))
    }

    async fn update_token_status(
        &self,
        id: i64,
        status: TokenStatus,
        accessed_at: i64,
    ) -> Result<(), GatewayError> {
        self.track(
            "update_token_status",
            EntityToken::update_many()
                .col_expr(ColumnToken::Status, Expr::value(status.code()))
                .col_expr(ColumnToken::AccessedTime, Expr::value(accessed_at))
                .filter(ColumnToken::Id.eq(id))
                .exec(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn add_token_quota(
        &self,
        id: i64,
        delta: i64,
        accessed_at: i64,
    ) -> Result<(), GatewayError> {
        self.track(
            "add_token_quota",
            EntityToken::update_many()
                .col_expr(
                    ColumnToken::RemainQuota,
                    Expr::col(ColumnToken::RemainQuota).add(delta),
                )
                .col_expr(
                    ColumnToken::UsedQuota,
                    Expr::col(ColumnToken::UsedQuota).sub(delta),
                )
                .col_expr(ColumnToken::AccessedTime, Expr::value(accessed_at))
                .filter(ColumnToken::Id.eq(id))
                .exec(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn try_debit_token(
        &self,
        id: i64,
        amount: i64,
        accessed_at: i64,
    ) -> Result<bool, GatewayError> {
        let res = self
            .track(
                "try_debit_token",
                EntityToken::update_many()
                    .col_expr(
                        ColumnToken::RemainQuota,
                        Expr::col(ColumnToken::RemainQuota).sub(amount),
                    )
                    .col_expr(
                        ColumnToken::UsedQuota,
                        Expr::col(ColumnToken::UsedQuota).add(amount),
                    )
                    .col_expr(ColumnToken::AccessedTime, Expr::value(accessed_at))
                    .filter(ColumnToken::Id.eq(id))
                    .filter(ColumnToken::RemainQuota.gte(amount))
                    .exec(&self.db),
            )
            .await?;
        Ok(res.rows_affected == 1)
    }

    async fn insert_user(&self, user: User) -> Result<i64, GatewayError> {
        let res = self
            .track(
                "insert_user",
                EntityUser::insert(user_to_active(user)).exec(&self.db),
            )
            .await?;
        Ok(res.last_insert_id)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, GatewayError> {
        let row = EntityUser::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(|e| GatewayError::storage("get_user", e))?;
        Ok(row.map(user_from_row))
    }

    async fn add_user_quota(&self, id: i64, delta: i64) -> Result<(), GatewayError> {
        self.track(
            "add_user_quota",
            EntityUser::update_many()
                .col_expr(ColumnUser::Quota, Expr::col(ColumnUser::Quota).add(delta))
                .filter(ColumnUser::Id.eq(id))
                .exec(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn add_user_used_quota(&self, id: i64, delta: i64) -> Result<(), GatewayError> {
        self.track(
            "add_user_used_quota",
            EntityUser::update_many()
                .col_expr(
                    ColumnUser::UsedQuota,
                    Expr::col(ColumnUser::UsedQuota).add(delta),
                )
                .filter(ColumnUser::Id.eq(id))
                .exec(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn add_user_request_count(&self, id: i64, delta: i64) -> Result<(), GatewayError> {
        self.track(
            "add_user_request_count",
            EntityUser::update_many()
                .col_expr(
                    ColumnUser::RequestCount,
                    Expr::col(ColumnUser::RequestCount).add(delta),
                )
                .filter(ColumnUser::Id.eq(id))
                .exec(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn try_debit_user(&self, id: i64, amount: i64) -> Result<bool, GatewayError> {
        let res = self
            .track(
                "try_debit_user",
                EntityUser::update_many()
                    .col_expr(ColumnUser::Quota, Expr::col(ColumnUser::Quota).sub(amount))
                    .col_expr(
                        ColumnUser::UsedQuota,
                        Expr::col(ColumnUser::UsedQuota).add(amount),
                    )
                    .filter(ColumnUser::Id.eq(id))
                    .filter(ColumnUser::Quota.gte(amount))
                    .exec(&self.db),
            )
            .await?;
        Ok(res.rows_affected == 1)
    }

    async fn count_users(&self) -> Result<u64, GatewayError> {
        EntityUser::find()
            .count(&self.db)
            .await
            .map_err(|e| GatewayError::storage("count_users", e))
    }

    async fn root_user_email(&self) -> Result<Option<String>, GatewayError> {
        let row = EntityUser::find()
            .filter(ColumnUser::Role.eq(UserRole::Root.code()))
            .one(&self.db)
            .await
            .map_err(|e| GatewayError::storage("root_user_email", e))?;
        Ok(row.and_then(|u| u.email))
    }

    async fn insert_redemptions(
        &self,
        redemptions: Vec<Redemption>,
    ) -> Result<Vec<i64>, GatewayError> {
        self.track("insert_redemptions", async {
            let txn = self.db.begin().await?;
            let mut ids = Vec::with_capacity(redemptions.len());
            for redemption in redemptions {
                let res = EntityRedemption::insert(redemption_to_active(redemption))
                    .exec(&txn)
                    .await?;
                ids.push(res.last_insert_id);
            }
            txn.commit().await?;
            Ok(ids)
        })
        .await
    }

    async fn get_redemption_by_key(&self, key: &str) -> Result<Option<Redemption>, GatewayError> {
        let row = EntityRedemption::find()
            .filter(ColumnRedemption::Key.eq(key))
            .one(&self.db)
            .await
            .map_err(|e| GatewayError::storage("get_redemption_by_key", e))?;
        Ok(row.map(redemption_from_row))
    }

    async fn redeem(&self, key: &str, user_id: i64, now: i64) -> Result<i64, GatewayError> {
        let storage = |e: DbErr| GatewayError::storage("redeem", e);
        // Dropping the transaction on an early return rolls it back
        let txn = self.db.begin().await.map_err(storage)?;
        let row = EntityRedemption::find()
            .filter(ColumnRedemption::Key.eq(key))
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(storage)?
            .ok_or(GatewayError::RedemptionNotFound)?;
        if row.status != RedemptionStatus::Enabled.code() {
            return Err(GatewayError::RedemptionAlreadyUsed);
        }
        if EntityUser::find_by_id(user_id)
            .one(&txn)
            .await
            .map_err(storage)?
            .is_none()
        {
            return Err(GatewayError::UserNotFound { id: user_id });
        }
        let claimed = EntityRedemption::update_many()
            .col_expr(
                ColumnRedemption::Status,
                Expr::value(RedemptionStatus::Used.code()),
            )
            .col_expr(ColumnRedemption::UserId, Expr::value(Some(user_id)))
            .col_expr(ColumnRedemption::RedeemedTime, Expr::value(now))
            .filter(ColumnRedemption::Id.eq(row.id))
            .filter(ColumnRedemption::Status.eq(RedemptionStatus::Enabled.code()))
            .exec(&txn)
            .await
            .map_err(storage)?;
        if claimed.rows_affected != 1 {
            return Err(GatewayError::RedemptionAlreadyUsed);
        }
        EntityUser::update_many()
            .col_expr(ColumnUser::Quota, Expr::col(ColumnUser::Quota).add(row.quota))
            .filter(ColumnUser::Id.eq(user_id))
            .exec(&txn)
            .await
            .map_err(storage)?;
        self.track("redeem", txn.commit()).await?;
        Ok(row.quota)
    }

    async fn insert_logs(&self, logs: &[LogEntry]) -> Result<(), GatewayError> {
        if logs.is_empty() {
            return Ok(());
        }
        self.track(
            "insert_logs",
            EntityLog::insert_many(logs.iter().map(log_to_active))
                .exec_without_returning(&self.db),
        )
        .await?;
        Ok(())
    }

    async fn list_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, GatewayError> {
        let rows = EntityLog::find()
            .filter(log_condition(filter))
            .order_by_desc(ColumnLog::Id)
            .offset(filter.offset)
            .limit((filter.limit > 0).then_some(filter.limit))
            .all(&self.db)
            .await
            .map_err(|e| GatewayError::storage("list_logs", e))?;
        Ok(rows.into_iter().map(log_from_row).collect())
    }

    async fn delete_logs_before(&self, timestamp: i64) -> Result<u64, GatewayError> {
        let res = self
            .track(
                "delete_logs_before",
                EntityLog::delete_many()
                    .filter(ColumnLog::CreatedAt.lt(timestamp))
                    .exec(&self.db),
            )
            .await?;
        Ok(res.rows_affected)
    }

    async fn sum_used_quota(&self, filter: &LogFilter) -> Result<i64, GatewayError> {
        self.sum_logs("sum_used_quota", filter, coalesced_sum(ColumnLog::Quota))
            .await
    }

    async fn sum_used_tokens(&self, filter: &LogFilter) -> Result<i64, GatewayError> {
        let total = Expr::expr(coalesced_sum(ColumnLog::PromptTokens))
            .add(coalesced_sum(ColumnLog::CompletionTokens));
        self.sum_logs("sum_used_tokens", filter, total).await
    }

    async fn load_options(&self) -> Result<HashMap<String, String>, GatewayError> {
        let rows = EntityOption::find()
            .all(&self.db)
            .await
            .map_err(|e| GatewayError::storage("load_options", e))?;
        Ok(rows.into_iter().map(|r| (r.k, r.value)).collect())
    }

    async fn set_option(&self, key: &str, value: &str) -> Result<(), GatewayError> {
        let am = ActiveModelOption {
            k: Set(key.to_string()),
            value: Set(value.to_string()),
        };
        self.track(
            "set_option",
            EntityOption::insert(am)
                .on_conflict(
                    OnConflict::column(ColumnOption::K)
                        .update_column(ColumnOption::Value)
                        .to_owned(),
                )
                .exec(&self.db),
        )
        .await?;
        Ok(())
    }
}

#[cfg(all(test, feature = "db-sqlite"))]
mod tests {
    use std::sync::Arc;

    use super::*;

    async fn sqlite_store() -> (tempfile::TempDir, Arc<DbStore>) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("gateway.db").display()
        );
        let store = DbStore::connect(&url).await.unwrap();
        (dir, Arc::new(store))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_redeem_credits_once() {
        let (_dir, store) = sqlite_store().await;
        let alice = store.insert_user(User::default()).await.unwrap();
        let bob = store.insert_user(User::default()).await.unwrap();
        store
            .insert_redemptions(vec![Redemption {
                key: "one-shot".into(),
                quota: 500,
                ..Default::default()
            }])
            .await
            .unwrap();

        let claim = |user_id| {
            let store = store.clone();
            tokio::spawn(async move { store.redeem("one-shot", user_id, 42).await })
        };
        let (a, b) = tokio::join!(claim(alice), claim(bob));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(
            [&a, &b].iter().filter(|r| r.is_ok()).count(),
            1,
            "exactly one claim wins: {a:?} {b:?}"
        );

        let quotas = [
            store.get_user(alice).await.unwrap().unwrap().quota,
            store.get_user(bob).await.unwrap().unwrap().quota,
        ];
        assert_eq!(quotas.iter().sum::<i64>(), 500);
        let code = store.get_redemption_by_key("one-shot").await.unwrap().unwrap();
        assert_eq!(code.status, RedemptionStatus::Used);
        let winner = if a.is_ok() { alice } else { bob };
        assert_eq!(code.user_id, Some(winner));
        assert!(matches!(
            store.redeem("one-shot", winner, 43).await,
            Err(GatewayError::RedemptionAlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn conditional_debits_respect_balance() {
        let (_dir, store) = sqlite_store().await;
        let uid = store
            .insert_user(User {
                quota: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(store.try_debit_user(uid, 7).await.unwrap());
        assert!(!store.try_debit_user(uid, 7).await.unwrap());
        let user = store.get_user(uid).await.unwrap().unwrap();
        assert_eq!((user.quota, user.used_quota), (3, 7));

        let tid = store
            .insert_token(Token {
                user_id: uid,
                key: "sk-db".into(),
                remain_quota: 5,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!store.try_debit_token(tid, 6, 1).await.unwrap());
        assert!(store.try_debit_token(tid, 5, 2).await.unwrap());
        let token = store.get_token(tid).await.unwrap().unwrap();
        assert_eq!((token.remain_quota, token.used_quota), (0, 5));
    }

    #[tokio::test]
    async fn usage_sums_and_user_count() {
        let (_dir, store) = sqlite_store().await;
        assert_eq!(store.count_users().await.unwrap(), 0);
        let empty = LogFilter::default();
        assert_eq!(store.sum_used_quota(&empty).await.unwrap(), 0);
        store
            .insert_logs(&[
                LogEntry {
                    kind: LogType::Consume,
                    username: "alice".into(),
                    quota: 30,
                    prompt_tokens: 7,
                    completion_tokens: 3,
                    ..Default::default()
                },
                LogEntry {
                    kind: LogType::Consume,
                    username: "bob".into(),
                    quota: 12,
                    prompt_tokens: 2,
                    completion_tokens: 2,
                    ..Default::default()
                },
                LogEntry {
                    kind: LogType::Topup,
                    username: "alice".into(),
                    quota: 900,
                    ..Default::default()
                },
            ])
            .await
            .unwrap();
        assert_eq!(store.sum_used_quota(&empty).await.unwrap(), 42);
        assert_eq!(store.sum_used_tokens(&empty).await.unwrap(), 14);
        let alice = LogFilter {
            username: Some("alice".into()),
            ..Default::default()
        };
        assert_eq!(store.sum_used_quota(&alice).await.unwrap(), 30);
        assert_eq!(store.sum_used_tokens(&alice).await.unwrap(), 10);
    }
}
