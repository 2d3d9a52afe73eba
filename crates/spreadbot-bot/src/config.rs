//! Application configuration.
//!
//! Process-level wiring only. Trading behaviour lives in the hot-reloaded
//! settings file named by `settings_path`.

use crate::error::{AppError, AppResult};
use rust_decimal::Decimal;
use serde::Deserialize;
use spreadbot_core::Backoff;
use spreadbot_exchange::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_REQUESTS_PER_SECOND};
use spreadbot_feed::{FeedConfig, FeedMode, SpreadFilter};
use std::path::Path;
use std::time::Duration;

/// Exchange connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Admission limit shared by every account.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: usize,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_requests_per_second() -> usize {
    DEFAULT_REQUESTS_PER_SECOND
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            requests_per_second: default_requests_per_second(),
            http_timeout_ms: default_http_timeout_ms(),
        }
    }
}

/// Market-data feed settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSection {
    #[serde(default)]
    pub mode: FeedMode,
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_min_spread_percent")]
    pub min_spread_percent: Decimal,
    #[serde(default = "default_max_spread_percent")]
    pub max_spread_percent: Decimal,
    #[serde(default = "default_feed_backoff")]
    pub backoff: Backoff,
}

fn default_feed_url() -> String {
    "http://127.0.0.1:8001/state".to_string()
}

fn default_poll_interval_ms() -> u64 {
    13_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_min_spread_percent() -> Decimal {
    Decimal::new(12, 1)
}

fn default_max_spread_percent() -> Decimal {
    Decimal::from(90)
}

fn default_feed_backoff() -> Backoff {
    Backoff::new(Duration::from_secs(1), Duration::from_secs(10))
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            mode: FeedMode::default(),
            url: default_feed_url(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            min_spread_percent: default_min_spread_percent(),
            max_spread_percent: default_max_spread_percent(),
            backoff: default_feed_backoff(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Trading settings, re-read on change.
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
    /// Per-symbol overrides merged with exchange contract details.
    #[serde(default = "default_tokens_path")]
    pub tokens_path: String,
    /// Re-read the tokens file this often; 0 disables reloading.
    #[serde(default)]
    pub tokens_reload_secs: u64,
    /// Redis for shared state; in-memory when absent.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub feed: FeedSection,
}

fn default_settings_path() -> String {
    "config/settings.toml".to_string()
}

fn default_tokens_path() -> String {
    "config/tokens.toml".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(text: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.exchange.requests_per_second == 0 {
            return Err(AppError::Config("exchange.requests_per_second must be > 0".into()));
        }
        if self.feed.min_spread_percent > self.feed.max_spread_percent {
            return Err(AppError::Config(format!(
                "feed.min_spread_percent {} exceeds max_spread_percent {}",
                self.feed.min_spread_percent, self.feed.max_spread_percent
            )));
        }
        if self.feed.url.trim().is_empty() {
            return Err(AppError::Config("feed.url is empty".into()));
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.exchange.base_url.clone(),
            timeout: Duration::from_millis(self.exchange.http_timeout_ms),
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            mode: self.feed.mode,
            url: self.feed.url.clone(),
            poll_interval: Duration::from_millis(self.feed.poll_interval_ms),
            request_timeout: Duration::from_millis(self.feed.request_timeout_ms),
            backoff: self.feed.backoff,
        }
    }

    pub fn spread_filter(&self) -> SpreadFilter {
        SpreadFilter {
            min_percent: self.feed.min_spread_percent,
            max_percent: self.feed.max_spread_percent,
        }
    }

    pub fn tokens_reload_interval(&self) -> Option<Duration> {
        (self.tokens_reload_secs > 0).then(|| Duration::from_secs(self.tokens_reload_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.exchange.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.exchange.requests_per_second, DEFAULT_REQUESTS_PER_SECOND);
        assert_eq!(config.client_config().timeout, Duration::from_secs(10));
        assert!(config.redis_url.is_none());
        assert!(config.tokens_reload_interval().is_none());

        let feed = config.feed_config();
        assert_eq!(feed.mode, FeedMode::Poll);
        assert_eq!(feed.poll_interval, Duration::from_secs(13));
        assert_eq!(feed.backoff.delay(1), Duration::from_secs(1));
        assert_eq!(config.spread_filter().min_percent, dec!(1.2));
    }

    #[test]
    fn test_sections_parse() {
        let config = AppConfig::from_toml(
            r#"
tokens_reload_secs = 60
redis_url = "redis://127.0.0.1/"

[exchange]
requests_per_second = 4

[feed]
mode = "push"
url = "ws://127.0.0.1:8001/ws"
min_spread_percent = 2.5
"#,
        )
        .unwrap();
        assert_eq!(config.exchange.requests_per_second, 4);
        assert_eq!(config.feed.mode, FeedMode::Push);
        assert_eq!(config.spread_filter().min_percent, dec!(2.5));
        assert_eq!(config.spread_filter().max_percent, dec!(90));
        assert_eq!(config.tokens_reload_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(AppConfig::from_toml("[exchange]\nrequests_per_second = 0").is_err());
        assert!(AppConfig::from_toml("[feed]\nmin_spread_percent = 95").is_err());
        assert!(AppConfig::from_toml("settings_path = [").is_err());
    }
}
