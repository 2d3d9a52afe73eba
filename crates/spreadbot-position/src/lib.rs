//! Position management for spreadbot.
//!
//! Watches open positions per account and applies, in order, pyramiding,
//! scaling out, stop loss, trailing stop and timeout exits.
//!
//! # Key Components
//!
//! - [`PositionMonitor`]: Periodic per-account loop
//! - [`PositionCloser`]: Reduce-only market-to-current closes
//! - [`TrailingStop`]: Peak tracking and retrace detection
//! - [`CloseReason`]: Why a position was reduced or closed

pub mod closer;
pub mod error;
pub mod monitor;
pub mod strategy;

pub use closer::PositionCloser;
pub use error::{PositionError, PositionResult};
pub use monitor::{Action, CycleReport, PositionMonitor};
pub use strategy::{
    reached_targets, stop_loss_hit, timed_out, wants_pyramid, CloseReason, TrailDecision,
    TrailingStop,
};
