use colored::Colorize;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use passwords::PasswordGenerator;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Display},
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::error;

use crate::{
    config::{
        CONFIG_NAME, ENV_PREFIX, default_async_log_frequency, default_batch_update_interval,
        default_channel_disable_after, default_channel_disable_threshold, default_ip,
        default_log_batch_size, default_port, default_probe_interval, default_probe_timeout,
        default_quota_remind_threshold, default_server_address, default_sync_frequency,
        default_token_cache_ttl, default_true,
    },
    error::GatewayError,
    utils::enabled,
};

/// Generates a random admin password
fn generate_password() -> String {
    let pg = PasswordGenerator {
        length: 48,
        numbers: true,
        lowercase_letters: true,
        uppercase_letters: true,
        symbols: false,
        spaces: false,
        exclude_similar_characters: true,
        strict: true,
    };
    pg.generate_one()
        .unwrap_or_else(|_| uuid::Uuid::new_v4().simple().to_string())
}

/// Startup configuration of the gateway control plane
///
/// Read once at startup; nothing in here is reloaded live.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    // Server settings
    #[serde(default = "default_ip")]
    ip: IpAddr,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    admin_password: String,
    #[serde(default = "default_server_address")]
    pub server_address: String,

    // Storage backends
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub redis_url: Option<String>,

    // Cache settings
    #[serde(default = "default_true")]
    pub memory_cache_enabled: bool,
    #[serde(default = "default_sync_frequency")]
    pub sync_frequency: u64,
    #[serde(default = "default_token_cache_ttl")]
    pub token_cache_ttl: u64,

    // Channel health settings
    /// Minutes between automatic sweeps, zero disables them
    #[serde(default)]
    pub channel_test_frequency: u64,
    #[serde(default = "default_channel_disable_threshold")]
    pub channel_disable_threshold: f64,
    #[serde(default = "default_channel_disable_after")]
    pub channel_disable_after: u32,
    #[serde(default = "default_true")]
    pub automatic_disable_channel: bool,
    #[serde(default = "default_true")]
    pub automatic_enable_channel: bool,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
    #[serde(default = "default_probe_interval")]
    pub probe_interval: u64,

    // Write coalescing
    #[serde(default)]
    pub batch_update_enabled: bool,
    #[serde(default = "default_batch_update_interval")]
    pub batch_update_interval: u64,

    // Log pipeline
    #[serde(default = "default_true")]
    pub log_consume_enabled: bool,
    #[serde(default)]
    pub async_log_enabled: bool,
    #[serde(default = "default_async_log_frequency")]
    pub async_log_frequency: u64,
    #[serde(default = "default_log_batch_size")]
    pub log_batch_size: usize,

    // Notifications
    #[serde(default = "default_quota_remind_threshold")]
    pub quota_remind_threshold: i64,
    #[serde(default)]
    pub root_email: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            admin_password: String::new(),
            server_address: default_server_address(),
            database_url: None,
            redis_url: None,
            memory_cache_enabled: true,
            sync_frequency: default_sync_frequency(),
            token_cache_ttl: default_token_cache_ttl(),
            channel_test_frequency: 0,
            channel_disable_threshold: default_channel_disable_threshold(),
            channel_disable_after: default_channel_disable_after(),
            automatic_disable_channel: true,
            automatic_enable_channel: true,
            probe_timeout: default_probe_timeout(),
            probe_interval: default_probe_interval(),
            batch_update_enabled: false,
            batch_update_interval: default_batch_update_interval(),
            log_consume_enabled: true,
            async_log_enabled: false,
            async_log_frequency: default_async_log_frequency(),
            log_batch_size: default_log_batch_size(),
            quota_remind_threshold: default_quota_remind_threshold(),
            root_email: None,
        }
    }
}

impl Display for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let web_addr = format!("http://{}", self.address());
        writeln!(
            f,
            "Admin Endpoint: {}\nAdmin Password: {}",
            web_addr.green().underline(),
            self.admin_password.yellow(),
        )?;
        writeln!(
            f,
            "Record store: {}",
            if self.database_url.is_some() {
                "database".blue()
            } else {
                "memory".blue()
            }
        )?;
        writeln!(
            f,
            "Cache: {}",
            if self.redis_url.is_some() {
                "redis".blue()
            } else {
                "local".blue()
            }
        )?;
        writeln!(f, "Batch update: {}", enabled(self.batch_update_enabled))?;
        writeln!(f, "Async consume log: {}", enabled(self.async_log_enabled))?;
        if self.channel_test_frequency > 0 {
            writeln!(
                f,
                "Channel test every {} min",
                self.channel_test_frequency.to_string().blue()
            )?;
        }
        Ok(())
    }
}

impl GatewayConfig {
    pub fn admin_auth(&self, key: &str) -> bool {
        !self.admin_password.is_empty() && key == self.admin_password
    }

    pub fn with_admin_password(mut self, password: impl Into<String>) -> Self {
        self.admin_password = password.into();
        self
    }

    /// Loads configuration from the TOML file and `QUOTAGATE_` environment variables
    ///
    /// # Arguments
    /// * `path` - Alternative config file, defaults to [`CONFIG_NAME`]
    pub fn load(path: Option<&Path>) -> Result<Self, GatewayError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_NAME));
        let config: GatewayConfig = Figment::new()
            .adjoin(Toml::file(&path))
            .admerge(Env::prefixed(ENV_PREFIX))
            .extract()
            .inspect_err(|e| {
                error!("Failed to load config: {}", e);
            })?;
        Ok(config.validate())
    }

    /// Save the configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), GatewayError> {
        std::fs::write(path, toml::ser::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Normalize the configuration
    pub fn validate(mut self) -> Self {
        if self.admin_password.trim().is_empty() {
            self.admin_password = generate_password();
        }
        if self.database_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            self.database_url = None;
        }
        if self.redis_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            self.redis_url = None;
        }
        if self.root_email.as_deref().is_some_and(|e| e.trim().is_empty()) {
            self.root_email = None;
        }
        self.sync_frequency = self.sync_frequency.max(1);
        self.token_cache_ttl = self.token_cache_ttl.max(1);
        self.batch_update_interval = self.batch_update_interval.max(1);
        self.async_log_frequency = self.async_log_frequency.max(1);
        self.probe_timeout = self.probe_timeout.max(1);
        self.channel_disable_after = self.channel_disable_after.max(1);
        if self.log_batch_size == 0 {
            self.log_batch_size = default_log_batch_size();
        }
        if self.channel_disable_threshold < 0.0 {
            self.channel_disable_threshold = 0.0;
        }
        self
    }

    /// address of admin server
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_frequency)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_cache_ttl)
    }

    pub fn batch_update_period(&self) -> Duration {
        Duration::from_secs(self.batch_update_interval)
    }

    pub fn async_log_period(&self) -> Duration {
        Duration::from_secs(self.async_log_frequency)
    }

    /// Period of automatic channel sweeps, if enabled
    pub fn channel_test_period(&self) -> Option<Duration> {
        (self.channel_test_frequency > 0)
            .then(|| Duration::from_secs(self.channel_test_frequency.saturating_mul(60)))
    }

    /// Latency above which enabled channels are disabled, if enabled
    pub fn latency_threshold(&self) -> Option<Duration> {
        (self.channel_disable_threshold > 0.0)
            .then(|| Duration::try_from_secs_f64(self.channel_disable_threshold).ok())
            .flatten()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_fills_password_and_clamps() {
        let raw = GatewayConfig {
            sync_frequency: 0,
            log_batch_size: 0,
            database_url: Some("  ".into()),
            ..Default::default()
        };
        let cfg = raw.validate();
        assert!(!cfg.admin_password.is_empty());
        assert_eq!(cfg.sync_frequency, 1);
        assert_eq!(cfg.log_batch_size, default_log_batch_size());
        assert!(cfg.database_url.is_none());
        assert!(cfg.admin_auth(&cfg.admin_password.clone()));
        assert!(!cfg.admin_auth("wrong"));
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            "admin_password = \"secret\"\nbatch_update_enabled = true\nchannel_test_frequency = 10\n",
        )
        .expect("write config");
        let cfg = GatewayConfig::load(Some(&path)).expect("load config");
        assert!(cfg.admin_auth("secret"));
        assert!(cfg.batch_update_enabled);
        assert_eq!(cfg.channel_test_period(), Some(Duration::from_secs(600)));
        assert_eq!(cfg.log_batch_size, default_log_batch_size());
    }

    #[test]
    fn zero_threshold_disables_latency_check() {
        let cfg = GatewayConfig {
            channel_disable_threshold: 0.0,
            ..Default::default()
        };
        assert!(cfg.latency_threshold().is_none());
        assert!(GatewayConfig::default().latency_threshold().is_some());
    }

    #[test]
    fn huge_intervals_saturate() {
        let cfg = GatewayConfig {
            channel_test_frequency: u64::MAX,
            channel_disable_threshold: f64::MAX,
            ..Default::default()
        };
        assert_eq!(
            cfg.channel_test_period(),
            Some(Duration::from_secs(u64::MAX))
        );
        assert!(cfg.latency_threshold().is_none());
    }
}
