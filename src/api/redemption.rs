use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    error::GatewayError,
    services::{Gateway, IssuedCodes},
    types::Redemption,
};

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub key: String,
    pub user_id: i64,
}

/// Claims a code for a user
pub async fn api_redeem(
    State(gw): State<Arc<Gateway>>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<Value>, GatewayError> {
    let quota = gw.redemptions.redeem(&req.key, req.user_id).await?;
    Ok(Json(json!({ "quota": quota })))
}

#[derive(Debug, Deserialize)]
pub struct CreateRedemptions {
    pub name: String,
    pub quota: i64,
    #[serde(default = "one")]
    pub count: usize,
}

fn one() -> usize {
    1
}

/// Issues a batch of codes
pub async fn api_post_redemptions(
    State(gw): State<Arc<Gateway>>,
    Json(req): Json<CreateRedemptions>,
) -> Result<Json<IssuedCodes>, GatewayError> {
    Ok(Json(
        gw.redemptions
            .create(&req.name, req.quota, req.count)
            .await?,
    ))
}

pub async fn api_get_redemption(
    State(gw): State<Arc<Gateway>>,
    Path(key): Path<String>,
) -> Result<Json<Redemption>, GatewayError> {
    gw.store
        .get_redemption_by_key(&key)
        .await?
        .map(Json)
        .ok_or(GatewayError::RedemptionNotFound)
}
