use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RedemptionStatus {
    #[default]
    Enabled,
    Disabled,
    Used,
}

impl RedemptionStatus {
    pub const fn code(self) -> i32 {
        match self {
            RedemptionStatus::Enabled => 1,
            RedemptionStatus::Disabled => 2,
            RedemptionStatus::Used => 3,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(RedemptionStatus::Enabled),
            2 => Some(RedemptionStatus::Disabled),
            3 => Some(RedemptionStatus::Used),
            _ => None,
        }
    }
}

/// Single use code crediting quota to whoever claims it first
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Redemption {
    pub id: i64,
    /// Redeemer, set once the code is used
    #[serde(default)]
    pub user_id: Option<i64>,
    pub key: String,
    pub status: RedemptionStatus,
    pub name: String,
    pub quota: i64,
    pub created_time: i64,
    #[serde(default)]
    pub redeemed_time: i64,
}
