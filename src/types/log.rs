use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogType {
    #[default]
    Unknown,
    Topup,
    Consume,
    Manage,
    System,
}

impl LogType {
    pub const fn code(self) -> i32 {
        match self {
            LogType::Unknown => 0,
            LogType::Topup => 1,
            LogType::Consume => 2,
            LogType::Manage => 3,
            LogType::System => 4,
        }
    }

    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => LogType::Topup,
            2 => LogType::Consume,
            3 => LogType::Manage,
            4 => LogType::System,
            _ => LogType::Unknown,
        }
    }
}

/// Append-only event record
///
/// `id` is assigned by the record store on insert and is zero before that.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub id: i64,
    pub user_id: i64,
    pub created_at: i64,
    #[serde(rename = "type")]
    pub kind: LogType,
    pub content: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token_name: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub quota: i64,
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub channel_id: i64,
}

/// Query for stored logs; unset fields do not filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFilter {
    pub kind: Option<LogType>,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub model_name: Option<String>,
    pub token_name: Option<String>,
    pub channel_id: Option<i64>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub offset: u64,
    pub limit: u64,
}

impl LogFilter {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.kind.is_none_or(|k| k == LogType::Unknown || entry.kind == k)
            && self.user_id.is_none_or(|u| entry.user_id == u)
            && self
                .username
                .as_deref()
                .is_none_or(|u| entry.username == u)
            && self
                .model_name
                .as_deref()
                .is_none_or(|m| entry.model_name == m)
            && self
                .token_name
                .as_deref()
                .is_none_or(|t| entry.token_name == t)
            && self.channel_id.is_none_or(|c| entry.channel_id == c)
            && self.start.is_none_or(|s| entry.created_at >= s)
            && self.end.is_none_or(|e| entry.created_at <= e)
    }

    /// The same filter narrowed to consume records, for usage totals
    pub fn consumption(&self) -> Self {
        Self {
            kind: Some(LogType::Consume),
            ..self.clone()
        }
    }
}

/// Usage totals over the consume records matching a [`LogFilter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStat {
    pub quota: i64,
    pub tokens: i64,
}
