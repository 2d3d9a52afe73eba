//! Exponential reconnect/retry backoff.

use serde::Deserialize;
use std::time::Duration;

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Backoff {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Add up to 1s of jitter to each delay.
    #[serde(default)]
    pub jitter: bool,
}

fn default_base_ms() -> u64 {
    1_000
}

fn default_max_ms() -> u64 {
    60_000
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_ms: default_max_ms(),
            jitter: false,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            max_ms: max.as_millis() as u64,
            jitter: false,
        }
    }

    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_ms.saturating_mul(1u64 << exponent).min(self.max_ms);
        let jitter = if self.jitter { jitter_ms() } else { 0 };
        Duration::from_millis(delay + jitter)
    }
}

fn jitter_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as u64
}
