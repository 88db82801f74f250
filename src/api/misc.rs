use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    VERSION_INFO,
    config::OPT_LOG_CONSUME_ENABLED,
    error::GatewayError,
    services::Gateway,
    types::{LogEntry, LogFilter, LogStat},
};

/// Checks the admin password; the route guard does the work
pub async fn api_auth() -> StatusCode {
    StatusCode::OK
}

pub async fn api_version() -> String {
    VERSION_INFO.to_string()
}

/// Snapshot of stores, caches and buffers
pub async fn api_status(State(gw): State<Arc<Gateway>>) -> Json<Value> {
    let roster = gw.cache.roster();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "store": gw.store.status().await,
        "cache": {
            "distributed": gw.cache.is_distributed(),
        },
        "channels": {
            "total": roster.len(),
            "enabled": roster.enabled_count(),
            "sweeping": gw.health.is_sweeping(),
        },
        "batch_update": {
            "enabled": gw.coalescer.is_some(),
            "pending": gw.coalescer.as_ref().map_or(0, |c| c.len()),
        },
        "logs": {
            "async": gw.logs.is_async(),
            "consume_enabled": gw.logs.consume_enabled(),
            "pending": gw.logs.pending(),
        },
    }))
}

pub async fn api_get_logs(
    State(gw): State<Arc<Gateway>>,
    Query(filter): Query<LogFilter>,
) -> Result<Json<Vec<LogEntry>>, GatewayError> {
    Ok(Json(gw.store.list_logs(&filter).await?))
}

/// Usage totals over consume logs; paging parameters are ignored
pub async fn api_get_log_stat(
    State(gw): State<Arc<Gateway>>,
    Query(filter): Query<LogFilter>,
) -> Result<Json<LogStat>, GatewayError> {
    Ok(Json(gw.logs.stat(&filter).await?))
}

#[derive(Debug, Deserialize)]
pub struct Retention {
    pub before: i64,
}

/// Deletes logs created before a unix timestamp
pub async fn api_delete_logs(
    State(gw): State<Arc<Gateway>>,
    Query(retention): Query<Retention>,
) -> Result<Json<Value>, GatewayError> {
    let removed = gw.logs.delete_before(retention.before).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Deserialize)]
pub struct OptionUpdate {
    pub key: String,
    pub value: String,
}

/// Stores an option and refreshes the option snapshot
pub async fn api_put_option(
    State(gw): State<Arc<Gateway>>,
    Json(update): Json<OptionUpdate>,
) -> Result<StatusCode, GatewayError> {
    if update.key.trim().is_empty() {
        return Err(GatewayError::BadRequest {
            msg: "option key must not be empty",
        });
    }
    gw.store.set_option(&update.key, &update.value).await?;
    gw.cache.sync_options().await?;
    if update.key == OPT_LOG_CONSUME_ENABLED {
        gw.logs
            .set_consume_enabled(gw.cache.options().bool_or(OPT_LOG_CONSUME_ENABLED, true));
    }
    info!(key = %update.key, "Option updated");
    Ok(StatusCode::OK)
}
