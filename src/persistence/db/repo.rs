use std::collections::HashMap;

use sea_orm::ActiveValue::{NotSet, Set};
use tracing::warn;

use crate::types::{
    Channel, ChannelStatus, ChannelType, LogEntry, LogType, Redemption, RedemptionStatus, Token,
    TokenStatus, User, UserRole, UserStatus, parse_models,
};

use super::entities::*;

// Row <-> record conversions. Unknown status codes fall back to the most
// restrictive value rather than failing the whole read.

pub fn channel_from_row(r: ModelChannel) -> Channel {
    let model_mapping = if r.model_mapping.trim().is_empty() {
        HashMap::new()
    } else {
        serde_json::from_str(&r.model_mapping).unwrap_or_else(|e| {
            warn!(channel_id = r.id, "Invalid model mapping: {}", e);
            HashMap::new()
        })
    };
    Channel {
        id: r.id,
        channel_type: ChannelType::from_code(r.channel_type).unwrap_or(ChannelType::Custom),
        key: r.key,
        status: ChannelStatus::from_code(r.status).unwrap_or(ChannelStatus::ManuallyDisabled),
        name: r.name,
        weight: u32::try_from(r.weight).unwrap_or(0),
        priority: r.priority,
        base_url: r.base_url,
        models: parse_models(&r.models),
        model_mapping,
        balance: r.balance,
        balance_updated_at: r.balance_updated_at,
        used_quota: r.used_quota,
        response_time_ms: r.response_time,
        test_time: r.test_time,
        group: r.channel_group,
        created_at: r.created_time,
        disabled_reason: r.disabled_reason,
    }
}

pub fn channel_to_active(c: Channel) -> ActiveModelChannel {
    ActiveModelChannel {
        id: NotSet,
        channel_type: Set(c.channel_type.code()),
        key: Set(c.key),
        status: Set(c.status.code()),
        name: Set(c.name),
        weight: Set(i64::from(c.weight)),
        priority: Set(c.priority),
        base_url: Set(c.base_url),
        models: Set(c.models.join(",")),
        model_mapping: Set(serde_json::to_string(&c.model_mapping).unwrap_or_default()),
        balance: Set(c.balance),
        balance_updated_at: Set(c.balance_updated_at),
        used_quota: Set(c.used_quota),
        response_time: Set(c.response_time_ms),
        test_time: Set(c.test_time),
        channel_group: Set(c.group),
        created_time: Set(c.created_at),
        disabled_reason: Set(c.disabled_reason),
    }
}

pub fn token_from_row(r: ModelToken) -> Token {
    Token {
        id: r.id,
        user_id: r.user_id,
        key: r.key,
        status: TokenStatus::from_code(r.status).unwrap_or(TokenStatus::Disabled),
        name: r.name,
        created_time: r.created_time,
        accessed_time: r.accessed_time,
        expired_time: r.expired_time,
        remain_quota: r.remain_quota,
        unlimited_quota: r.unlimited_quota,
        used_quota: r.used_quota,
    }
}

pub fn token_to_active(t: Token) -> ActiveModelToken {
    ActiveModelToken {
        id: NotSet,
        user_id: Set(t.user_id),
        key: Set(t.key),
        status: Set(t.status.code()),
        name: Set(t.name),
        created_time: Set(t.created_time),
        accessed_time: Set(t.accessed_time),
        expired_time: Set(t.expired_time),
        remain_quota: Set(t.remain_quota),
        unlimited_quota: Set(t.unlimited_quota),
        used_quota: Set(t.used_quota),
    }
}

pub fn user_from_row(r: ModelUser) -> User {
    User {
        id: r.id,
        username: r.username,
        email: r.email,
        role: UserRole::from_code(r.role).unwrap_or(UserRole::Common),
        status: UserStatus::from_code(r.status).unwrap_or(UserStatus::Disabled),
        quota: r.quota,
        used_quota: r.used_quota,
        request_count: r.request_count,
    }
}

pub fn user_to_active(u: User) -> ActiveModelUser {
    ActiveModelUser {
        id: NotSet,
        username: Set(u.username),
        email: Set(u.email),
        role: Set(u.role.code()),
        status: Set(u.status.code()),
        quota: Set(u.quota),
        used_quota: Set(u.used_quota),
        request_count: Set(u.request_count),
    }
}

pub fn redemption_from_row(r: ModelRedemption) -> Redemption {
    Redemption {
        id: r.id,
        user_id: r.user_id,
        key: r.key,
        status: RedemptionStatus::from_code(r.status).unwrap_or(RedemptionStatus::Disabled),
        name: r.name,
        quota: r.quota,
        created_time: r.created_time,
        redeemed_time: r.redeemed_time,
    }
}

pub fn redemption_to_active(r: Redemption) -> ActiveModelRedemption {
    ActiveModelRedemption {
        id: NotSet,
        user_id: Set(r.user_id),
        key: Set(r.key),
        status: Set(r.status.code()),
        name: Set(r.name),
        quota: Set(r.quota),
        created_time: Set(r.created_time),
        redeemed_time: Set(r.redeemed_time),
    }
}

pub fn log_from_row(r: ModelLog) -> LogEntry {
    LogEntry {
        id: r.id,
        user_id: r.user_id,
        created_at: r.created_at,
        kind: LogType::from_code(r.kind),
        content: r.content,
        username: r.username,
        token_name: r.token_name,
        model_name: r.model_name,
        quota: r.quota,
        prompt_tokens: r.prompt_tokens,
        completion_tokens: r.completion_tokens,
        channel_id: r.channel_id,
    }
}

pub fn log_to_active(l: &LogEntry) -> ActiveModelLog {
    ActiveModelLog {
        id: NotSet,
        user_id: Set(l.user_id),
        created_at: Set(l.created_at),
        kind: Set(l.kind.code()),
        content: Set(l.content.clone()),
        username: Set(l.username.clone()),
        token_name: Set(l.token_name.clone()),
        model_name: Set(l.model_name.clone()),
        quota: Set(l.quota),
        prompt_tokens: Set(l.prompt_tokens),
        completion_tokens: Set(l.completion_tokens),
        channel_id: Set(l.channel_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_row_decodes_models_and_mapping() {
        let row = ModelChannel {
            id: 4,
            channel_type: 3,
            key: "k".into(),
            status: 3,
            name: "azure".into(),
            weight: 2,
            priority: 1,
            base_url: None,
            models: "gpt-4o,gpt-4o-mini".into(),
            model_mapping: "{\"gpt-4o\":\"prod-4o\"}".into(),
            balance: 1.5,
            balance_updated_at: 0,
            used_quota: 9,
            response_time: 120,
            test_time: 7,
            channel_group: "default".into(),
            created_time: 0,
            disabled_reason: Some("401".into()),
        };
        let channel = channel_from_row(row);
        assert_eq!(channel.channel_type, ChannelType::Azure);
        assert_eq!(channel.status, ChannelStatus::AutoDisabled);
        assert_eq!(channel.models.len(), 2);
        assert_eq!(channel.map_model("gpt-4o"), "prod-4o");
    }

    #[test]
    fn unknown_codes_are_restrictive() {
        let token = token_from_row(ModelToken {
            id: 1,
            user_id: 1,
            key: "k".into(),
            status: 42,
            name: String::new(),
            created_time: 0,
            accessed_time: 0,
            expired_time: -1,
            remain_quota: 0,
            unlimited_quota: false,
            used_quota: 0,
        });
        assert_eq!(token.status, TokenStatus::Disabled);
    }
}
