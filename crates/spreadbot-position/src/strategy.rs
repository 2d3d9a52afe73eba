//! Exit and add-on rules.
//!
//! Pure decisions over a position snapshot; the monitor owns the state
//! reads, writes and orders that follow from them.

use rust_decimal::Decimal;
use spreadbot_core::{PositionType, Price, ScaleOutTarget, Settings};

// ============================================================================
// CloseReason
// ============================================================================

/// Why the monitor reduced or closed a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    ScaleOut,
    StopLoss,
    TrailingStop,
    Timeout,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScaleOut => "scale_out",
            Self::StopLoss => "stop_loss",
            Self::TrailingStop => "trailing_stop",
            Self::Timeout => "timeout",
        }
    }

    /// Full closes wipe the per-position state.
    pub fn is_full_close(&self) -> bool {
        !matches!(self, Self::ScaleOut)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Rules
// ============================================================================

/// Leveraged PnL at or below `-|stop_loss_percent|`.
///
/// A missing or zero stop loss never triggers.
pub fn stop_loss_hit(pnl_pct: Decimal, stop_loss_percent: Option<Decimal>) -> bool {
    match stop_loss_percent.filter(|sl| !sl.is_zero()) {
        Some(sl) => pnl_pct <= -sl.abs(),
        None => false,
    }
}

/// Holding time beyond the configured limit.
pub fn timed_out(age_ms: i64, max_age_ms: Option<i64>) -> bool {
    max_age_ms.is_some_and(|limit| age_ms > limit)
}

/// Pyramiding gate: threshold reached and entries left.
pub fn wants_pyramid(settings: &Settings, pnl_pct: Decimal, entries: i64) -> bool {
    settings.use_pyramiding
        && pnl_pct >= settings.pyramiding.pnl_threshold_percent
        && entries < i64::from(settings.pyramiding.max_entries)
}

/// Targets, ascending, that the current PnL has reached.
pub fn reached_targets(targets: &[ScaleOutTarget], pnl_pct: Decimal) -> impl Iterator<Item = &ScaleOutTarget> {
    targets.iter().take_while(move |t| pnl_pct >= t.pnl_percent)
}

/// Trailing stop parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingStop {
    /// Leveraged PnL (%) that arms the trail.
    pub activation_percent: Decimal,
    /// Price retrace (%) from the peak that closes.
    pub trailing_percent: Decimal,
}

/// Trail state after observing one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailDecision {
    /// Not armed yet.
    Inactive,
    /// Armed; `peak` is the best price so far.
    Track { peak: Price },
    /// Retraced far enough from `peak`.
    Close { peak: Price },
}

impl TrailingStop {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            activation_percent: settings.trailing_activation_percent,
            trailing_percent: settings.trailing_percent.abs(),
        }
    }

    /// Best of `peak` and `current` for `side`. Never moves against the position.
    pub fn advance(side: PositionType, peak: Option<Price>, current: Price) -> Price {
        match (side, peak) {
            (_, None) => current,
            (PositionType::Long, Some(peak)) => peak.max(current),
            (PositionType::Short, Some(peak)) => peak.min(current),
        }
    }

    /// Evaluate one observation against a previously stored peak.
    pub fn evaluate(&self, side: PositionType, stored_peak: Option<Price>, current: Price, pnl_pct: Decimal) -> TrailDecision {
        if stored_peak.is_none() && pnl_pct < self.activation_percent {
            return TrailDecision::Inactive;
        }
        let peak = Self::advance(side, stored_peak, current);
        let retraced = match side {
            PositionType::Long => current <= peak.offset_pct(-self.trailing_percent),
            PositionType::Short => current >= peak.offset_pct(self.trailing_percent),
        };
        if retraced {
            TrailDecision::Close { peak }
        } else {
            TrailDecision::Track { peak }
        }
    }
}
