use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use itertools::Itertools;

use crate::{
    error::GatewayError,
    types::{Channel, ChannelStatus},
};

/// Immutable snapshot of every channel, replaced wholesale on refresh
#[derive(Debug, Default)]
pub struct ChannelRoster {
    channels: Vec<Arc<Channel>>,
    cursor: AtomicU64,
}

impl ChannelRoster {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            channels: channels
                .into_iter()
                .sorted_by_key(|c| c.id)
                .map(Arc::new)
                .collect(),
            cursor: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn get(&self, id: i64) -> Option<Arc<Channel>> {
        self.channels.iter().find(|c| c.id == id).cloned()
    }

    pub fn enabled_count(&self) -> usize {
        self.channels.iter().filter(|c| c.is_enabled()).count()
    }

    /// Copy of this roster with one channel's status replaced
    pub fn with_status(&self, id: i64, status: ChannelStatus, reason: Option<&str>) -> Self {
        let channels = self
            .channels
            .iter()
            .map(|c| {
                if c.id != id {
                    return c.clone();
                }
                let mut updated = Channel::clone(c);
                updated.status = status;
                updated.disabled_reason = reason.map(ToOwned::to_owned);
                Arc::new(updated)
            })
            .collect();
        Self {
            channels,
            cursor: AtomicU64::new(self.cursor.load(Ordering::Relaxed)),
        }
    }

    /// Picks an enabled channel serving `model` for `group`
    ///
    /// Only the highest priority tier is considered. Inside the tier channels
    /// take turns in proportion to their weight.
    pub fn select(&self, group: &str, model: &str) -> Result<Arc<Channel>, GatewayError> {
        let candidates = self
            .channels
            .iter()
            .filter(|c| c.is_enabled() && c.in_group(group) && c.supports_model(model))
            .collect::<Vec<_>>();
        let no_channel = || GatewayError::NoChannelAvailable {
            group: group.to_string(),
            model: model.to_string(),
        };
        let top = candidates
            .iter()
            .map(|c| c.priority)
            .max()
            .ok_or_else(no_channel)?;
        let tier = candidates
            .into_iter()
            .filter(|c| c.priority == top)
            .collect::<Vec<_>>();
        let total = tier.iter().map(|c| c.effective_weight()).sum::<u64>();
        let mut tick = self.cursor.fetch_add(1, Ordering::Relaxed) % total;
        for channel in &tier {
            let weight = channel.effective_weight();
            if tick < weight {
                return Ok(Arc::clone(channel));
            }
            tick -= weight;
        }
        tier.last().map(|c| Arc::clone(c)).ok_or_else(no_channel)
    }
}

/// Global option values loaded from the record store
#[derive(Debug, Clone, Default)]
pub struct OptionSnapshot {
    values: HashMap<String, String>,
}

impl OptionSnapshot {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => v.eq_ignore_ascii_case("true") || v == "1",
            None => default,
        }
    }

    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: i64, priority: i64, weight: u32) -> Channel {
        Channel {
            id,
            priority,
            weight,
            models: vec!["gpt-4o".into()],
            ..Default::default()
        }
    }

    #[test]
    fn select_uses_top_priority_tier_only() {
        let roster = ChannelRoster::new([channel(1, 0, 10), channel(2, 5, 1), channel(3, 5, 1)]);
        for _ in 0..10 {
            let picked = roster.select("default", "gpt-4o").unwrap();
            assert_ne!(picked.id, 1);
        }
    }

    #[test]
    fn select_follows_weights() {
        let roster = ChannelRoster::new([channel(1, 0, 3), channel(2, 0, 1)]);
        let picks = (0..8)
            .map(|_| roster.select("default", "gpt-4o").unwrap().id)
            .counts();
        assert_eq!(picks[&1], 6);
        assert_eq!(picks[&2], 2);
    }

    #[test]
    fn disabled_and_unrelated_channels_are_skipped() {
        let mut other_group = channel(2, 9, 1);
        other_group.group = "vip".into();
        let roster = ChannelRoster::new([channel(1, 0, 1), other_group])
            .with_status(1, ChannelStatus::AutoDisabled, Some("401"));
        assert!(matches!(
            roster.select("default", "gpt-4o"),
            Err(GatewayError::NoChannelAvailable { .. })
        ));
        assert_eq!(roster.select("vip", "gpt-4o").unwrap().id, 2);
        assert_eq!(
            roster.get(1).unwrap().disabled_reason.as_deref(),
            Some("401")
        );
        assert!(roster.select("vip", "claude").is_err());
    }

    #[test]
    fn option_parsing_falls_back() {
        let opts = OptionSnapshot::new(HashMap::from([
            ("A".to_string(), "true".to_string()),
            ("B".to_string(), "12".to_string()),
            ("C".to_string(), "x".to_string()),
        ]));
        assert!(opts.bool_or("A", false));
        assert!(!opts.bool_or("C", true));
        assert!(opts.bool_or("missing", true));
        assert_eq!(opts.i64_or("B", 0), 12);
        assert_eq!(opts.i64_or("C", 7), 7);
    }
}
