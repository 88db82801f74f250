use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    error::GatewayError,
    services::{Gateway, ProbeOutcome, ProbeReport},
    types::{Channel, ChannelStatus},
    utils::now,
};

/// Lists every stored channel
pub async fn api_get_channels(
    State(gw): State<Arc<Gateway>>,
) -> Result<Json<Vec<Channel>>, GatewayError> {
    Ok(Json(gw.store.list_channels().await?))
}

/// Bulk creates channels and refreshes the roster
pub async fn api_post_channels(
    State(gw): State<Arc<Gateway>>,
    Json(channels): Json<Vec<Channel>>,
) -> Result<Json<Value>, GatewayError> {
    if channels.is_empty() {
        return Err(GatewayError::BadRequest {
            msg: "no channels given",
        });
    }
    let ids = gw.store.insert_channels(channels).await?;
    gw.cache.sync_channels().await?;
    info!(count = ids.len(), "Channels created");
    Ok(Json(json!({ "ids": ids })))
}

/// Hard deletes every channel taken out of service
pub async fn api_delete_disabled_channels(
    State(gw): State<Arc<Gateway>>,
) -> Result<Json<Value>, GatewayError> {
    let removed = gw
        .store
        .delete_channels_by_status(&[ChannelStatus::ManuallyDisabled, ChannelStatus::AutoDisabled])
        .await?;
    gw.cache.sync_channels().await?;
    info!(removed, "Disabled channels deleted");
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Deserialize)]
pub struct BalanceUpdate {
    pub balance: f64,
}

/// Records a provider reported balance for a channel
pub async fn api_put_channel_balance(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<i64>,
    Json(update): Json<BalanceUpdate>,
) -> Result<Json<Value>, GatewayError> {
    if !update.balance.is_finite() {
        return Err(GatewayError::BadRequest {
            msg: "balance must be a finite number",
        });
    }
    gw.store
        .get_channel(id)
        .await?
        .ok_or(GatewayError::ChannelNotFound { id })?;
    let updated_at = now();
    gw.store
        .update_channel_balance(id, update.balance, updated_at)
        .await?;
    Ok(Json(json!({ "id": id, "balance": update.balance, "balance_updated_at": updated_at })))
}

/// Probes one channel and reports the verdict
///
/// A probe that fails surfaces as a [`GatewayError::ChannelProbe`]; status
/// changes it caused are already applied.
pub async fn api_test_channel(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<i64>,
) -> Result<Json<ProbeReport>, GatewayError> {
    let report = gw.health.test_channel(id).await?;
    match &report.outcome {
        ProbeOutcome::Healthy => Ok(Json(report)),
        ProbeOutcome::Fatal(reason) | ProbeOutcome::Transient(reason) => {
            Err(GatewayError::ChannelProbe {
                id,
                reason: reason.clone(),
            })
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SweepParams {
    pub notify: bool,
}

/// Starts a background sweep over all channels
pub async fn api_test_all_channels(
    State(gw): State<Arc<Gateway>>,
    Query(params): Query<SweepParams>,
) -> Result<Json<Value>, GatewayError> {
    gw.health.test_all(params.notify)?;
    Ok(Json(json!({ "started": true })))
}
