use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

/// Lifecycle state of an upstream channel
///
/// Only `AutoDisabled` is ever entered or left by the health monitor;
/// `ManuallyDisabled` belongs to operators.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelStatus {
    #[default]
    Enabled,
    ManuallyDisabled,
    AutoDisabled,
}

impl ChannelStatus {
    /// Storage code of the status
    pub const fn code(self) -> i32 {
        match self {
            ChannelStatus::Enabled => 1,
            ChannelStatus::ManuallyDisabled => 2,
            ChannelStatus::AutoDisabled => 3,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ChannelStatus::Enabled),
            2 => Some(ChannelStatus::ManuallyDisabled),
            3 => Some(ChannelStatus::AutoDisabled),
            _ => None,
        }
    }
}

/// Upstream provider family
///
/// Only the wire shape used for health probes depends on this; routing
/// treats every type the same.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelType {
    #[default]
    OpenAi,
    Azure,
    Custom,
    OpenAiSb,
    OpenAiMax,
    OhMyGpt,
    Ails,
    AiProxy,
    PaLM,
    Api2Gpt,
    AiGc2d,
    Anthropic,
    Baidu,
    Zhipu,
    Ali,
    Xunfei,
    Ai360,
    OpenRouter,
}

impl ChannelType {
    pub const fn code(self) -> i32 {
        match self {
            ChannelType::OpenAi => 1,
            ChannelType::Azure => 3,
            ChannelType::Custom => 8,
            ChannelType::OpenAiSb => 5,
            ChannelType::OpenAiMax => 6,
            ChannelType::OhMyGpt => 7,
            ChannelType::Ails => 9,
            ChannelType::AiProxy => 10,
            ChannelType::PaLM => 11,
            ChannelType::Api2Gpt => 12,
            ChannelType::AiGc2d => 13,
            ChannelType::Anthropic => 14,
            ChannelType::Baidu => 15,
            ChannelType::Zhipu => 16,
            ChannelType::Ali => 17,
            ChannelType::Xunfei => 18,
            ChannelType::Ai360 => 19,
            ChannelType::OpenRouter => 20,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => ChannelType::OpenAi,
            3 => ChannelType::Azure,
            8 => ChannelType::Custom,
            5 => ChannelType::OpenAiSb,
            6 => ChannelType::OpenAiMax,
            7 => ChannelType::OhMyGpt,
            9 => ChannelType::Ails,
            10 => ChannelType::AiProxy,
            11 => ChannelType::PaLM,
            12 => ChannelType::Api2Gpt,
            13 => ChannelType::AiGc2d,
            14 => ChannelType::Anthropic,
            15 => ChannelType::Baidu,
            16 => ChannelType::Zhipu,
            17 => ChannelType::Ali,
            18 => ChannelType::Xunfei,
            19 => ChannelType::Ai360,
            20 => ChannelType::OpenRouter,
            _ => return None,
        })
    }

    /// Default API root used when the channel carries no base URL override
    pub const fn default_base_url(self) -> &'static str {
        match self {
            ChannelType::OpenAi => "https://api.openai.com",
            ChannelType::OpenAiSb => "https://api.openai-sb.com",
            ChannelType::OpenAiMax => "https://api.openaimax.com",
            ChannelType::OhMyGpt => "https://api.ohmygpt.com",
            ChannelType::Ails => "https://api.caipacity.com",
            ChannelType::AiProxy => "https://api.aiproxy.io",
            ChannelType::Api2Gpt => "https://api.api2gpt.com",
            ChannelType::AiGc2d => "https://api.aigc2d.com",
            ChannelType::Anthropic => "https://api.anthropic.com",
            ChannelType::Baidu => "https://aip.baidubce.com",
            ChannelType::Zhipu => "https://open.bigmodel.cn",
            ChannelType::Ali => "https://dashscope.aliyuncs.com",
            ChannelType::Ai360 => "https://ai.360.cn",
            ChannelType::OpenRouter => "https://openrouter.ai/api",
            ChannelType::PaLM => "https://generativelanguage.googleapis.com",
            ChannelType::Xunfei | ChannelType::Azure | ChannelType::Custom => "",
        }
    }

    /// Whether the synthetic OpenAI-style probe can reach this provider
    pub const fn is_probe_supported(self) -> bool {
        !matches!(
            self,
            ChannelType::PaLM
                | ChannelType::Anthropic
                | ChannelType::Baidu
                | ChannelType::Zhipu
                | ChannelType::Ali
                | ChannelType::Ai360
                | ChannelType::Xunfei
        )
    }
}

/// An upstream provider credential together with its routing metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub key: String,
    pub status: ChannelStatus,
    pub name: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    /// Provider reported balance in USD
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub balance_updated_at: i64,
    #[serde(default)]
    pub used_quota: i64,
    /// Latency of the last probe in milliseconds
    #[serde(default)]
    pub response_time_ms: i64,
    #[serde(default)]
    pub test_time: i64,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub created_at: i64,
    /// Why the health monitor took the channel out of service
    #[serde(default)]
    pub disabled_reason: Option<String>,
}

fn default_group() -> String {
    "default".to_string()
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            id: 0,
            channel_type: ChannelType::default(),
            key: String::new(),
            status: ChannelStatus::Enabled,
            name: String::new(),
            weight: 0,
            priority: 0,
            base_url: None,
            models: Vec::new(),
            model_mapping: HashMap::new(),
            balance: 0.0,
            balance_updated_at: 0,
            used_quota: 0,
            response_time_ms: 0,
            test_time: 0,
            group: default_group(),
            created_at: 0,
            disabled_reason: None,
        }
    }
}

impl Channel {
    pub fn is_enabled(&self) -> bool {
        self.status == ChannelStatus::Enabled
    }

    /// Groups this channel serves, split on commas
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.group.split(',').map(str::trim).filter(|g| !g.is_empty())
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups().any(|g| g == group)
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// Upstream model name after applying the channel's remapping
    pub fn map_model<'a>(&'a self, model: &'a str) -> &'a str {
        self.model_mapping
            .get(model)
            .map(String::as_str)
            .unwrap_or(model)
    }

    /// API root the gateway talks to for this channel
    pub fn api_base(&self) -> &str {
        match self.base_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url.trim_end_matches('/'),
            _ => self.channel_type.default_base_url(),
        }
    }

    /// Routing weight, where zero still gets a share
    pub fn effective_weight(&self) -> u64 {
        u64::from(self.weight.max(1))
    }
}

/// Splits a stored comma separated model list
pub fn parse_models(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for status in [
            ChannelStatus::Enabled,
            ChannelStatus::ManuallyDisabled,
            ChannelStatus::AutoDisabled,
        ] {
            assert_eq!(ChannelStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(ChannelStatus::from_code(0), None);
    }

    #[test]
    fn base_url_override_wins() {
        let mut channel = Channel {
            channel_type: ChannelType::OpenAi,
            ..Default::default()
        };
        assert_eq!(channel.api_base(), "https://api.openai.com");
        channel.base_url = Some("https://relay.example.com/".into());
        assert_eq!(channel.api_base(), "https://relay.example.com");
        channel.base_url = Some("  ".into());
        assert_eq!(channel.api_base(), "https://api.openai.com");
    }

    #[test]
    fn groups_and_models() {
        let channel = Channel {
            group: "default, vip".into(),
            models: parse_models("gpt-4o, gpt-4o-mini,,"),
            model_mapping: HashMap::from([("gpt-4o".to_string(), "gpt-4o-2024".to_string())]),
            ..Default::default()
        };
        assert!(channel.in_group("vip"));
        assert!(!channel.in_group("free"));
        assert!(channel.supports_model("gpt-4o-mini"));
        assert_eq!(channel.map_model("gpt-4o"), "gpt-4o-2024");
        assert_eq!(channel.map_model("gpt-4o-mini"), "gpt-4o-mini");
    }
}
