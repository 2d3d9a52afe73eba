//! Order processing engine.
//!
//! Consumes spread candidates and runs each through leverage negotiation,
//! entry submission, fill confirmation and protective-order placement,
//! with per-symbol exclusivity and cooldowns.

pub mod engine;
pub mod error;
pub mod fill;
pub mod processor;

pub use engine::OrderEngine;
pub use error::{ExecutorError, ExecutorResult};
pub use fill::{Fill, FillConfirmer, FillSource};
pub use processor::{FailedStage, OrderProcessor, Outcome, SkipReason};
