use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// REST root, e.g. `http://localhost:5000/api`.
    pub base_url: String,
    /// Status-update WebSocket, e.g. `ws://localhost:5000/ws`.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Per-request timeout. Unset means requests may wait indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_ws_url() -> String {
    "ws://localhost:5000/ws".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_interval_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    /// `"exponential"` or `"fixed"`.
    #[serde(default = "default_backoff")]
    pub backoff: String,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            backoff: default_backoff(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_backoff() -> String {
    "exponential".to_string()
}
fn default_min_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    #[serde(default = "default_duration_ms")]
    pub default_duration_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            default_duration_ms: default_duration_ms(),
        }
    }
}

fn default_duration_ms() -> u64 {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    10
}

impl Config {
    /// Settings for a local backend on the default ports, used when no
    /// config file is present.
    pub fn minimal() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:5000/api".to_string(),
                ws_url: default_ws_url(),
                timeout_secs: None,
            },
            polling: PollingConfig::default(),
            channel: ChannelConfig::default(),
            notifications: NotificationsConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate api
    if !(config.api.base_url.starts_with("http://") || config.api.base_url.starts_with("https://"))
    {
        anyhow::bail!("api.base_url must start with http:// or https://");
    }
    if !(config.api.ws_url.starts_with("ws://") || config.api.ws_url.starts_with("wss://")) {
        anyhow::bail!("api.ws_url must start with ws:// or wss://");
    }
    if config.api.timeout_secs == Some(0) {
        anyhow::bail!("api.timeout_secs must be > 0 when set");
    }

    // Validate polling
    if config.polling.interval_ms == 0 {
        anyhow::bail!("polling.interval_ms must be > 0");
    }

    // Validate channel
    if config.channel.min_delay_ms == 0 {
        anyhow::bail!("channel.min_delay_ms must be > 0");
    }
    if config.channel.max_delay_ms < config.channel.min_delay_ms {
        anyhow::bail!("channel.max_delay_ms must be >= channel.min_delay_ms");
    }
    match config.channel.backoff.as_str() {
        "exponential" | "fixed" => {}
        other => anyhow::bail!(
            "Unknown channel backoff: '{}'. Must be exponential or fixed.",
            other
        ),
    }

    // Validate session
    if config.session.page_size == 0 {
        anyhow::bail!("session.page_size must be >= 1");
    }

    Ok(())
}
