//! Typed state keys.
//!
//! Every key the engine writes has a kind with a fixed prefix and a default
//! expiry, so nothing outlives the position it describes by much.

use rust_decimal::Decimal;
use std::fmt;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Kind of state entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Symbol-level suppression of new entries.
    Cooldown,
    /// Spread at entry, per position.
    InitialSpread,
    /// Best price seen since the trailing stop armed.
    PeakPrice,
    /// Volume baseline for scale-out fractions.
    InitialVolume,
    /// A scale-out target that already fired.
    ScaleOutHit,
    /// Add-on entries made so far.
    PyramidEntries,
    /// Claim on one add-on attempt.
    PyramidLock,
}

impl StateKind {
    pub const ALL: [StateKind; 7] = [
        Self::Cooldown,
        Self::InitialSpread,
        Self::PeakPrice,
        Self::InitialVolume,
        Self::ScaleOutHit,
        Self::PyramidEntries,
        Self::PyramidLock,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Cooldown => "cooldown",
            Self::InitialSpread => "initial_spread",
            Self::PeakPrice => "peak_price",
            Self::InitialVolume => "initial_volume",
            Self::ScaleOutHit => "scale_out_hit",
            Self::PyramidEntries => "pyramiding_entries",
            Self::PyramidLock => "pyramid_lock",
        }
    }

    /// Default expiry for entries of this kind.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::Cooldown => Duration::from_secs(300),
            Self::PyramidLock => Duration::from_secs(300),
            Self::InitialSpread
            | Self::PeakPrice
            | Self::InitialVolume
            | Self::ScaleOutHit
            | Self::PyramidEntries => DAY * 7,
        }
    }
}

/// Fully qualified state key: `{prefix}:{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub kind: StateKind,
    pub id: String,
}

impl StateKey {
    pub fn new(kind: StateKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn cooldown(symbol: &str) -> Self {
        Self::new(StateKind::Cooldown, symbol)
    }

    pub fn initial_spread(position_id: i64) -> Self {
        Self::new(StateKind::InitialSpread, position_id.to_string())
    }

    pub fn peak_price(position_id: i64) -> Self {
        Self::new(StateKind::PeakPrice, position_id.to_string())
    }

    pub fn initial_volume(position_id: i64) -> Self {
        Self::new(StateKind::InitialVolume, position_id.to_string())
    }

    /// Hit marker for the target at `pnl_percent`.
    pub fn scale_out_hit(position_id: i64, pnl_percent: Decimal) -> Self {
        Self::new(
            StateKind::ScaleOutHit,
            format!("{position_id}:{}", pnl_percent.normalize()),
        )
    }

    pub fn pyramid_entries(position_id: i64) -> Self {
        Self::new(StateKind::PyramidEntries, position_id.to_string())
    }

    /// Lock for add-on attempt number `entry`.
    pub fn pyramid_lock(position_id: i64, entry: i64) -> Self {
        Self::new(StateKind::PyramidLock, format!("{position_id}:{entry}"))
    }

    pub fn default_ttl(&self) -> Duration {
        self.kind.default_ttl()
    }

    /// Storage key string.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Single-valued per-position keys, for deletion on close.
    pub fn position_keys(position_id: i64) -> Vec<StateKey> {
        vec![
            Self::initial_spread(position_id),
            Self::peak_price(position_id),
            Self::initial_volume(position_id),
            Self::pyramid_entries(position_id),
        ]
    }

    /// Prefixes of the multi-valued per-position kinds (hit markers, locks).
    ///
    /// Matching by prefix also catches markers for targets that have since
    /// been removed from the settings.
    pub fn position_prefixes(position_id: i64) -> Vec<String> {
        [StateKind::ScaleOutHit, StateKind::PyramidLock]
            .iter()
            .map(|kind| format!("{}:{position_id}:", kind.prefix()))
            .collect()
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.id)
    }
}
