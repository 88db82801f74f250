use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum_auth::AuthBearer;
use tracing::warn;

use crate::{error::GatewayError, services::Gateway};

/// Rejects requests whose bearer token is not the admin password
pub struct RequireAdminAuth;

impl FromRequestParts<Arc<Gateway>> for RequireAdminAuth {
    type Rejection = GatewayError;
    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &Arc<Gateway>,
    ) -> Result<Self, Self::Rejection> {
        let AuthBearer(key) = AuthBearer::from_request_parts(parts, &())
            .await
            .map_err(|_| GatewayError::InvalidAuth)?;
        if !state.config.admin_auth(&key) {
            warn!("Invalid admin key");
            return Err(GatewayError::InvalidAuth);
        }
        Ok(Self)
    }
}
