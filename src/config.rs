//! Configuration management
//!
//! This module handles loading configuration from TOML files. Accounts are
//! keyed by the network interface they dial through.

use crate::models::Account;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// How to tell whether a re-dial is needed
    #[serde(default)]
    pub online_check: OnlineCheckConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Interface name -> account
    #[serde(default)]
    pub accounts: BTreeMap<String, Account>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    /// Portal base URL; a scheme is added when missing
    #[serde(default)]
    pub server_url: String,

    /// Extra signin trials after the first
    #[serde(default)]
    pub retry: u32,

    /// Seconds between signin trials
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,

    /// Re-dial period in seconds for daemon mode
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Bounce the interface once retries are exhausted
    #[serde(default)]
    pub restart_link: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            retry: 0,
            retry_interval: default_retry_interval(),
            check_interval: default_check_interval(),
            restart_link: false,
        }
    }
}

impl GlobalConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OnlineCheckConfig {
    #[serde(default)]
    pub enabled: bool,

    /// "portal" or "ping"; empty means portal
    #[serde(default)]
    pub method: String,

    /// Ping target
    #[serde(default = "default_ping_host")]
    pub host: String,

    /// Echo requests per check
    #[serde(default = "default_ping_count")]
    pub count: u16,

    /// Minimum reply ratio to count as online
    #[serde(default = "default_ping_threshold")]
    pub threshold: f64,
}

impl Default for OnlineCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: String::new(),
            host: default_ping_host(),
            count: default_ping_count(),
            threshold: default_ping_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_retry_interval() -> u64 {
    30
}

fn default_check_interval() -> u64 {
    60
}

fn default_ping_host() -> String {
    "8.8.8.8".to_string()
}

fn default_ping_count() -> u16 {
    3
}

fn default_ping_threshold() -> f64 {
    0.5
}

fn default_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `path`, or from the first default location
    /// that exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let config_paths = vec![
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/rover/config.toml"),
            dirs::home_dir()
                .map(|h| h.join(".config/rover/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default().normalized())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config file")?;
        Ok(config.normalized())
    }

    /// Replace zero values with defaults and give the server URL a scheme
    fn normalized(mut self) -> Self {
        self.global.server_url = normalize_server_url(&self.global.server_url);
        if self.global.retry_interval == 0 {
            self.global.retry_interval = default_retry_interval();
        }
        if self.global.check_interval == 0 {
            self.global.check_interval = default_check_interval();
        }

        let check = &mut self.online_check;
        if check.host.trim().is_empty() {
            check.host = default_ping_host();
        }
        if check.count == 0 {
            check.count = default_ping_count();
        }
        if check.threshold <= 0.0 {
            check.threshold = default_ping_threshold();
        }
        self
    }
}

/// `10.0.0.1/` -> `http://10.0.0.1`
pub fn normalize_server_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
