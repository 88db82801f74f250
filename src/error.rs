use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use snafu::Location;
use strum::IntoStaticStr;

/// Every failure the gateway control plane can surface
///
/// The snake_case variant name doubles as the stable machine readable kind,
/// see [`GatewayError::kind`].
#[derive(Debug, IntoStaticStr, snafu::Snafu)]
#[snafu(visibility(pub(crate)))]
#[strum(serialize_all = "snake_case")]
pub enum GatewayError {
    #[snafu(display("Quota amount must not be negative: {}", amount))]
    InvalidQuotaAmount { amount: i64 },
    #[snafu(display(
        "Insufficient token quota: remaining {}, requested {}",
        remaining,
        requested
    ))]
    InsufficientTokenQuota { remaining: i64, requested: i64 },
    #[snafu(display(
        "Insufficient user quota: balance {}, requested {}",
        balance,
        requested
    ))]
    InsufficientUserQuota { balance: i64, requested: i64 },
    #[snafu(display("Token not found"))]
    TokenNotFound,
    #[snafu(display("Token has expired"))]
    TokenExpired,
    #[snafu(display("Token quota is exhausted"))]
    TokenExhausted,
    #[snafu(display("Token is disabled"))]
    TokenDisabled,
    #[snafu(display("User {} not found", id))]
    UserNotFound { id: i64 },
    #[snafu(display("Channel {} not found", id))]
    ChannelNotFound { id: i64 },
    #[snafu(display("No channel available for model {} in group {}", model, group))]
    NoChannelAvailable { group: String, model: String },
    #[snafu(display("Redemption code not found"))]
    RedemptionNotFound,
    #[snafu(display("Redemption code has already been used"))]
    RedemptionAlreadyUsed,
    #[snafu(display("Invalid redemption key"))]
    InvalidRedemptionKey,
    #[snafu(display("Channel test sweep is already running"))]
    SweepInProgress,
    #[snafu(display("Channel {} probe failed: {}", id, reason))]
    ChannelProbe { id: i64, reason: String },
    #[snafu(display("Bad request: {}", msg))]
    BadRequest { msg: &'static str },
    #[snafu(display("Key/Password Invalid"))]
    InvalidAuth,
    #[snafu(display("Storage error during {}: {}", op, source))]
    Storage {
        op: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[snafu(display("Cache error during {}: {}", op, source))]
    Cache {
        op: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[snafu(display("Failed to load config: {}", source))]
    #[snafu(context(false))]
    Figment {
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
    #[snafu(display("Failed to serialize TOML: {}", source))]
    #[snafu(context(false))]
    TomlSe { source: toml::ser::Error },
    #[snafu(display("JSON error: {}", source))]
    #[snafu(context(false))]
    Json { source: serde_json::Error },
    #[snafu(display("HTTP client error: {}", source))]
    #[snafu(context(false))]
    HttpClient { source: wreq::Error },
    #[snafu(display("IO error: {}, at: {}", source, loc))]
    #[snafu(context(false))]
    Io {
        #[snafu(implicit)]
        loc: Location,
        source: std::io::Error,
    },
}

impl GatewayError {
    /// Wraps a record store failure
    pub fn storage(op: &'static str, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        GatewayError::Storage {
            op,
            source: Box::new(err),
        }
    }

    /// Wraps a cache backend failure
    pub fn cache(op: &'static str, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        GatewayError::Cache {
            op,
            source: Box::new(err),
        }
    }

    /// Stable machine readable error kind
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Rejections decided before any upstream work happens
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidQuotaAmount { .. }
                | GatewayError::InsufficientTokenQuota { .. }
                | GatewayError::InsufficientUserQuota { .. }
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidQuotaAmount { .. }
            | GatewayError::BadRequest { .. }
            | GatewayError::InvalidRedemptionKey
            | GatewayError::RedemptionNotFound => StatusCode::BAD_REQUEST,
            GatewayError::InsufficientTokenQuota { .. }
            | GatewayError::InsufficientUserQuota { .. } => StatusCode::PAYMENT_REQUIRED,
            GatewayError::TokenNotFound
            | GatewayError::TokenExpired
            | GatewayError::TokenExhausted
            | GatewayError::TokenDisabled
            | GatewayError::InvalidAuth => StatusCode::UNAUTHORIZED,
            GatewayError::UserNotFound { .. } | GatewayError::ChannelNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            GatewayError::RedemptionAlreadyUsed | GatewayError::SweepInProgress => {
                StatusCode::CONFLICT
            }
            GatewayError::NoChannelAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ChannelProbe { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = ErrorResponse {
            error: ErrorBody {
                message: self.to_string(),
                r#type: self.kind().to_string(),
                code: Some(status.as_u16()),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// HTTP error response
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Inner HTTP error response
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorBody {
    pub message: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_snake_case() {
        let err = GatewayError::InsufficientTokenQuota {
            remaining: 1,
            requested: 2,
        };
        assert_eq!(err.kind(), "insufficient_token_quota");
        assert!(err.is_admission());
        assert_eq!(GatewayError::RedemptionAlreadyUsed.kind(), "redemption_already_used");
        assert!(!GatewayError::TokenExpired.is_admission());
    }

    #[test]
    fn storage_errors_keep_operation() {
        let err = GatewayError::storage("insert_logs", std::io::Error::other("disk full"));
        assert_eq!(err.kind(), "storage");
        assert!(err.to_string().contains("insert_logs"));
        assert!(err.to_string().contains("disk full"));
    }
}
