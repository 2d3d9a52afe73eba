//! Trading settings and their hot-reloadable source.
//!
//! Settings are re-read on every order and every monitor cycle so edits to
//! the settings file take effect without a restart.

use crate::error::{CoreError, Result};
use crate::order::{EntryOrderType, MarginMode};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Exchange session token. Zeroed on drop, redacted in `Debug`.
#[derive(Clone, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Short, log-safe identifier.
    pub fn fingerprint(&self) -> String {
        let tail: String = self.0.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        format!("***{tail}")
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken({})", self.fingerprint())
    }
}

/// Pyramiding parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PyramidingSettings {
    /// Leveraged PnL (%) at which an add-on entry is attempted.
    #[serde(default = "default_pyramid_threshold")]
    pub pnl_threshold_percent: Decimal,
    /// Maximum add-on entries per position.
    #[serde(default)]
    pub max_entries: u32,
    /// Margin used for each add-on entry.
    #[serde(default = "default_add_margin")]
    pub add_margin_amount: Decimal,
}

fn default_pyramid_threshold() -> Decimal {
    Decimal::from(999)
}

fn default_add_margin() -> Decimal {
    Decimal::from(5)
}

impl Default for PyramidingSettings {
    fn default() -> Self {
        Self {
            pnl_threshold_percent: default_pyramid_threshold(),
            max_entries: 0,
            add_margin_amount: default_add_margin(),
        }
    }
}

/// One staged profit target.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScaleOutTarget {
    /// Leveraged PnL (%) that triggers this target.
    pub pnl_percent: Decimal,
    /// Fraction (0..=1) of the initial volume to close.
    pub close_fraction: Decimal,
}

/// Fill confirmation parameters.
///
/// Order-status polling is the primary strategy; the position scan always
/// runs when it times out or is disabled.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FillConfirmationSettings {
    #[serde(default = "default_true")]
    pub poll_order_status: bool,
    #[serde(default = "default_market_wait_ms")]
    pub market_wait_ms: u64,
    #[serde(default = "default_limit_wait_ms")]
    pub limit_wait_ms: u64,
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
    #[serde(default = "default_market_scan_attempts")]
    pub market_scan_attempts: u32,
    #[serde(default = "default_market_scan_delay_ms")]
    pub market_scan_delay_ms: u64,
    #[serde(default = "default_limit_scan_attempts")]
    pub limit_scan_attempts: u32,
    #[serde(default = "default_limit_scan_delay_ms")]
    pub limit_scan_delay_ms: u64,
}

fn default_market_wait_ms() -> u64 {
    8_000
}

fn default_limit_wait_ms() -> u64 {
    60_000
}

fn default_poll_delay_ms() -> u64 {
    500
}

fn default_market_scan_attempts() -> u32 {
    20
}

fn default_market_scan_delay_ms() -> u64 {
    300
}

fn default_limit_scan_attempts() -> u32 {
    8
}

fn default_limit_scan_delay_ms() -> u64 {
    1_000
}

impl Default for FillConfirmationSettings {
    fn default() -> Self {
        Self {
            poll_order_status: true,
            market_wait_ms: default_market_wait_ms(),
            limit_wait_ms: default_limit_wait_ms(),
            poll_delay_ms: default_poll_delay_ms(),
            market_scan_attempts: default_market_scan_attempts(),
            market_scan_delay_ms: default_market_scan_delay_ms(),
            limit_scan_attempts: default_limit_scan_attempts(),
            limit_scan_delay_ms: default_limit_scan_delay_ms(),
        }
    }
}

impl FillConfirmationSettings {
    /// How long to poll order status for an entry of `order_type`.
    pub fn order_wait(&self, order_type: EntryOrderType) -> Duration {
        Duration::from_millis(match order_type {
            EntryOrderType::Market => self.market_wait_ms,
            EntryOrderType::Limit => self.limit_wait_ms,
        })
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms.max(1))
    }

    /// Position scan attempts and the delay between them.
    pub fn scan_plan(&self, order_type: EntryOrderType) -> (u32, Duration) {
        let (attempts, delay_ms) = match order_type {
            EntryOrderType::Market => (self.market_scan_attempts, self.market_scan_delay_ms),
            EntryOrderType::Limit => (self.limit_scan_attempts, self.limit_scan_delay_ms),
        };
        (attempts.max(1), Duration::from_millis(delay_ms))
    }
}

/// Trading settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// Primary account token. `MEXC_AUTH_TOKEN` is used when absent.
    #[serde(default)]
    pub auth_token: Option<AuthToken>,
    /// Additional accounts whose positions are monitored.
    #[serde(default)]
    pub extra_accounts: Vec<AuthToken>,
    /// Global margin per entry order.
    #[serde(default)]
    pub max_margin_per_order: Option<Decimal>,
    /// Target leverage; capped per symbol by `max_leverage`.
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default = "default_true")]
    pub hedge_mode: bool,
    #[serde(default, deserialize_with = "deserialize_margin_mode")]
    pub margin_mode: MarginMode,
    #[serde(default)]
    pub entry_order_type: EntryOrderType,

    // --- Cooldowns ---
    #[serde(default = "default_true")]
    pub use_cooldown: bool,
    /// After a successful entry.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// After a stop-loss close.
    #[serde(default = "default_loss_cooldown_seconds")]
    pub loss_cooldown_seconds: u64,
    /// After a timeout close.
    #[serde(default = "default_timeout_cooldown_seconds")]
    pub timeout_cooldown_seconds: u64,
    /// After the leverage protocol fails.
    #[serde(default = "default_failure_cooldown_seconds")]
    pub leverage_failure_cooldown_seconds: u64,
    /// After order creation or sizing fails.
    #[serde(default = "default_failure_cooldown_seconds")]
    pub order_failure_cooldown_seconds: u64,
    /// Pause between the cancel-all and the leverage retry.
    #[serde(default = "default_leverage_retry_delay_ms")]
    pub leverage_retry_delay_ms: u64,

    // --- Monitor ---
    #[serde(default = "default_monitor_interval_seconds")]
    pub monitor_interval_seconds: u64,
    /// Sleep after an unexpected error in a loop body.
    #[serde(default = "default_error_sleep_seconds")]
    pub error_sleep_seconds: u64,
    #[serde(default)]
    pub max_position_hours: Option<Decimal>,

    // --- Exits ---
    /// Leveraged PnL loss (%) that closes a position; also the price
    /// distance (%) of the exchange-side protective stop.
    #[serde(default)]
    pub stop_loss_percent: Option<Decimal>,
    /// Price distance (%) of the exchange-side protective take-profit.
    #[serde(default)]
    pub take_profit_percent: Option<Decimal>,
    #[serde(default)]
    pub use_trailing_stop: bool,
    #[serde(default = "default_trailing_activation_percent")]
    pub trailing_activation_percent: Decimal,
    #[serde(default = "default_trailing_percent")]
    pub trailing_percent: Decimal,
    #[serde(default)]
    pub use_pyramiding: bool,
    #[serde(default)]
    pub pyramiding: PyramidingSettings,
    #[serde(default)]
    pub use_scaling_out: bool,
    #[serde(default)]
    pub scale_out_targets: Vec<ScaleOutTarget>,

    #[serde(default)]
    pub fill_confirmation: FillConfirmationSettings,
}

fn default_true() -> bool {
    true
}

fn default_cooldown_seconds() -> u64 {
    300
}

fn default_loss_cooldown_seconds() -> u64 {
    600
}

fn default_timeout_cooldown_seconds() -> u64 {
    300
}

fn default_failure_cooldown_seconds() -> u64 {
    60
}

fn default_leverage_retry_delay_ms() -> u64 {
    250
}

fn default_monitor_interval_seconds() -> u64 {
    10
}

fn default_error_sleep_seconds() -> u64 {
    30
}

fn default_trailing_activation_percent() -> Decimal {
    Decimal::from(10)
}

fn default_trailing_percent() -> Decimal {
    Decimal::from(5)
}

fn deserialize_margin_mode<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<MarginMode, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Code(i64),
        Name(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Code(code) => MarginMode::from_code(code).map_err(serde::de::Error::custom),
        Repr::Name(name) => match name.to_ascii_lowercase().as_str() {
            "isolated" => Ok(MarginMode::Isolated),
            "cross" => Ok(MarginMode::Cross),
            other => Err(serde::de::Error::custom(format!("unknown margin mode: {other}"))),
        },
    }
}

impl Default for Settings {
    fn default() -> Self {
        // An empty document exercises every serde default.
        toml::from_str("").unwrap_or_else(|_| unreachable!("empty settings must parse"))
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|e| CoreError::InvalidConfig(format!("settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        // A zero retrace would close on the cycle the stop arms.
        if self.trailing_percent <= Decimal::ZERO {
            return Err(CoreError::InvalidConfig(format!(
                "settings: trailing_percent must be > 0, got {}",
                self.trailing_percent
            )));
        }
        Ok(())
    }

    /// Load settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Primary auth token, falling back to `MEXC_AUTH_TOKEN`.
    pub fn primary_token(&self) -> Option<AuthToken> {
        self.auth_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| {
                std::env::var("MEXC_AUTH_TOKEN")
                    .ok()
                    .map(AuthToken::new)
                    .filter(|t| !t.is_empty())
            })
    }

    /// Scale-out targets sorted ascending by PnL threshold.
    pub fn sorted_scale_out_targets(&self) -> Vec<ScaleOutTarget> {
        let mut targets = self.scale_out_targets.clone();
        targets.sort_by(|a, b| a.pnl_percent.cmp(&b.pnl_percent));
        targets
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn loss_cooldown(&self) -> Duration {
        Duration::from_secs(self.loss_cooldown_seconds)
    }

    pub fn timeout_cooldown(&self) -> Duration {
        Duration::from_secs(self.timeout_cooldown_seconds)
    }

    pub fn leverage_failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.leverage_failure_cooldown_seconds)
    }

    pub fn order_failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.order_failure_cooldown_seconds)
    }

    pub fn leverage_retry_delay(&self) -> Duration {
        Duration::from_millis(self.leverage_retry_delay_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds.max(1))
    }

    pub fn error_sleep(&self) -> Duration {
        Duration::from_secs(self.error_sleep_seconds)
    }

    /// Maximum holding time, if configured.
    pub fn max_position_age_ms(&self) -> Option<i64> {
        use rust_decimal::prelude::ToPrimitive;
        self.max_position_hours
            .filter(|h| *h > Decimal::ZERO)
            .and_then(|h| (h * Decimal::from(3_600_000)).to_i64())
    }
}

/// Provides the current settings.
pub trait SettingsSource: Send + Sync {
    fn current(&self) -> Arc<Settings>;
}

/// Fixed settings (tests, one-shot tools).
#[derive(Debug, Clone)]
pub struct StaticSettings(Arc<Settings>);

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self(Arc::new(settings))
    }
}

impl SettingsSource for StaticSettings {
    fn current(&self) -> Arc<Settings> {
        self.0.clone()
    }
}

#[derive(Debug)]
struct Cached {
    modified: Option<SystemTime>,
    settings: Arc<Settings>,
}

/// Settings file re-read whenever its modification time changes.
///
/// A missing or unparsable file keeps the last good settings.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    cached: Mutex<Cached>,
}

impl FileSettings {
    /// Open a settings file; the first load must succeed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        let settings = Settings::from_file(&path)?;
        info!(path = %path.display(), "Settings loaded");
        Ok(Self {
            path,
            cached: Mutex::new(Cached {
                modified,
                settings: Arc::new(settings),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsSource for FileSettings {
    fn current(&self) -> Arc<Settings> {
        let mut cached = self.cached.lock();
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => Some(modified),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Settings file unavailable, keeping last good");
                return cached.settings.clone();
            }
        };
        if modified == cached.modified {
            return cached.settings.clone();
        }
        match Settings::from_file(&self.path) {
            Ok(settings) => {
                info!(path = %self.path.display(), "Settings reloaded");
                cached.settings = Arc::new(settings);
                cached.modified = modified;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Settings reload failed, keeping last good");
            }
        }
        cached.settings.clone()
    }
}
