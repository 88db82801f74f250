use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::error::GatewayError;

/// Persisted status of a token
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TokenStatus {
    #[default]
    Enabled,
    Disabled,
    Expired,
    Exhausted,
}

impl TokenStatus {
    pub const fn code(self) -> i32 {
        match self {
            TokenStatus::Enabled => 1,
            TokenStatus::Disabled => 2,
            TokenStatus::Expired => 3,
            TokenStatus::Exhausted => 4,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(TokenStatus::Enabled),
            2 => Some(TokenStatus::Disabled),
            3 => Some(TokenStatus::Expired),
            4 => Some(TokenStatus::Exhausted),
            _ => None,
        }
    }
}

/// Expiry marker for tokens that never expire
pub const NEVER_EXPIRES: i64 = -1;

/// A caller facing credential bound to one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: i64,
    pub user_id: i64,
    pub key: String,
    pub status: TokenStatus,
    pub name: String,
    pub created_time: i64,
    pub accessed_time: i64,
    pub expired_time: i64,
    pub remain_quota: i64,
    pub unlimited_quota: bool,
    pub used_quota: i64,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            id: 0,
            user_id: 0,
            key: String::new(),
            status: TokenStatus::Enabled,
            name: String::new(),
            created_time: 0,
            accessed_time: 0,
            expired_time: NEVER_EXPIRES,
            remain_quota: 0,
            unlimited_quota: false,
            used_quota: 0,
        }
    }
}

/// Result of evaluating whether a token may be used right now
///
/// Evaluation never mutates the token; callers that want to persist a
/// status flip use [`TokenState::status_flip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum TokenState {
    Valid,
    Expired,
    Exhausted,
    Disabled,
}

impl TokenState {
    /// Single place deciding token usability
    pub fn evaluate(token: &Token, now: i64) -> Self {
        match token.status {
            TokenStatus::Expired => return TokenState::Expired,
            TokenStatus::Exhausted => return TokenState::Exhausted,
            TokenStatus::Disabled => return TokenState::Disabled,
            TokenStatus::Enabled => {}
        }
        if token.expired_time != NEVER_EXPIRES && token.expired_time < now {
            return TokenState::Expired;
        }
        if !token.unlimited_quota && token.remain_quota <= 0 {
            return TokenState::Exhausted;
        }
        TokenState::Valid
    }

    /// Status to write back when the stored status is still `Enabled`
    /// but evaluation says otherwise
    pub fn status_flip(self, token: &Token) -> Option<TokenStatus> {
        if token.status != TokenStatus::Enabled {
            return None;
        }
        match self {
            TokenState::Expired => Some(TokenStatus::Expired),
            TokenState::Exhausted => Some(TokenStatus::Exhausted),
            TokenState::Valid | TokenState::Disabled => None,
        }
    }

    pub fn into_result(self) -> Result<(), GatewayError> {
        match self {
            TokenState::Valid => Ok(()),
            TokenState::Expired => Err(GatewayError::TokenExpired),
            TokenState::Exhausted => Err(GatewayError::TokenExhausted),
            TokenState::Disabled => Err(GatewayError::TokenDisabled),
        }
    }
}
