use std::net::{IpAddr, Ipv4Addr};

pub const CONFIG_NAME: &str = "quotagate.toml";
pub const ENV_PREFIX: &str = "QUOTAGATE_";
pub const LOG_FILE_NAME: &str = "quotagate.log";

/// Rows per bulk log insert statement
pub const LOG_BATCH_SIZE: usize = 1024;
/// Model named in synthetic health probes
pub const PROBE_MODEL: &str = "gpt-3.5-turbo";
/// Deployment name assumed for Azure health probes
pub const AZURE_PROBE_MODEL: &str = "gpt-35-turbo";
pub const AZURE_API_VERSION: &str = "2023-03-15-preview";

// Option table keys that override startup configuration when present
pub const OPT_QUOTA_REMIND_THRESHOLD: &str = "QuotaRemindThreshold";
pub const OPT_CHANNEL_DISABLE_THRESHOLD: &str = "ChannelDisableThreshold";
pub const OPT_AUTO_DISABLE_CHANNEL: &str = "AutomaticDisableChannelEnabled";
pub const OPT_AUTO_ENABLE_CHANNEL: &str = "AutomaticEnableChannelEnabled";
pub const OPT_LOG_CONSUME_ENABLED: &str = "LogConsumeEnabled";

// Default functions
/// Default IP address for the admin server to bind to
pub fn default_ip() -> IpAddr {
    Ipv4Addr::new(127, 0, 0, 1).into()
}

/// Default port for the admin server
pub const fn default_port() -> u16 {
    3000
}

pub const fn default_true() -> bool {
    true
}

/// Cache snapshot refresh period in seconds
pub const fn default_sync_frequency() -> u64 {
    600
}

/// Lifetime of cached token lookups in seconds
pub const fn default_token_cache_ttl() -> u64 {
    60
}

/// Probe request timeout in seconds
pub const fn default_probe_timeout() -> u64 {
    30
}

/// Pause between channels during a sweep, in milliseconds
pub const fn default_probe_interval() -> u64 {
    1000
}

/// Response time above which an enabled channel is disabled, in seconds
pub const fn default_channel_disable_threshold() -> f64 {
    5.0
}

/// Consecutive fatal probes before a channel is taken out of service
pub const fn default_channel_disable_after() -> u32 {
    1
}

/// Coalescer flush period in seconds
pub const fn default_batch_update_interval() -> u64 {
    5
}

/// Log pipeline flush period in seconds
pub const fn default_async_log_frequency() -> u64 {
    5
}

pub const fn default_log_batch_size() -> usize {
    LOG_BATCH_SIZE
}

/// Balance below which users get a reminder
pub const fn default_quota_remind_threshold() -> i64 {
    1000
}

pub fn default_server_address() -> String {
    "http://localhost:3000".to_string()
}
