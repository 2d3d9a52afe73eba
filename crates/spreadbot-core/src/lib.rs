//! Core domain types for the spreadbot trading engine.
//!
//! This crate provides fundamental types shared by every other crate:
//! - `Price`, `Size`: Precision-safe numeric types with scale flooring
//! - `OrderSide`, `OrderKind`, `MarginMode`: Exchange wire enums
//! - `TokenBook`: Shared per-symbol configuration with the in-process claim
//! - `Settings`: Hot-reloadable trading settings

pub mod backoff;
pub mod decimal;
pub mod error;
pub mod order;
pub mod settings;
pub mod sizing;
pub mod token;
pub mod types;

pub use backoff::Backoff;
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use order::{
    EntryOrderType, MarginMode, OrderKind, OrderSide, OrderState, PositionType, TriggerType,
};
pub use settings::{
    AuthToken, FileSettings, FillConfirmationSettings, PyramidingSettings, ScaleOutTarget,
    Settings, SettingsSource, StaticSettings,
};
pub use sizing::{compute_volume, VolumeSpec};
pub use token::{OrderGuard, TokenBook, TokenConfig, TokenEntry};
pub use types::{spread_pct, OrderCandidate, Position, RawPosition, Ticker, POSITION_STATE_HOLDING};
