// Settings Model
// Daemon-wide configuration

use serde::{Deserialize, Serialize};

fn default_relay_host() -> String {
    "localhost".to_string()
}

fn default_relay_port() -> u16 {
    8080
}

fn default_relay_username() -> String {
    "admin".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_retention_days() -> u32 {
    30
}

/// Application settings stored in settings.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    // Relay control plane
    #[serde(default = "default_relay_host")]
    pub relay_host: String,

    #[serde(default = "default_relay_port")]
    pub relay_port: u16,

    #[serde(default)]
    pub relay_use_https: bool,

    #[serde(default = "default_relay_username")]
    pub relay_username: String,

    /// Stored encrypted on disk
    #[serde(default)]
    pub relay_password: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // Failover policy
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_failure_threshold")]
    pub default_failure_threshold: u32,

    // Storage
    #[serde(default)]
    pub encrypt_stream_keys: bool,

    // Logging
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay_host: default_relay_host(),
            relay_port: default_relay_port(),
            relay_use_https: false,
            relay_username: default_relay_username(),
            relay_password: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            default_failure_threshold: default_failure_threshold(),
            encrypt_stream_keys: false,
            log_level: default_log_level(),
            log_retention_days: default_log_retention_days(),
        }
    }
}

impl Settings {
    /// Base URL of the relay REST API
    pub fn relay_base_url(&self) -> String {
        let scheme = if self.relay_use_https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.relay_host, self.relay_port)
    }

    /// Parsed log level, falling back to Info on unknown values
    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
