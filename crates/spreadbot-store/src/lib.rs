//! Risk-strategy state for spreadbot.
//!
//! Cooldowns, trailing peaks, scale-out markers and pyramiding counters live
//! in an expiring key-value store shared by the order engine and the
//! position monitor.

pub mod error;
pub mod key;
pub mod risk;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use key::{StateKey, StateKind};
pub use risk::RiskState;
pub use store::{BoxFuture, DynStore, MemoryStore, RedisStore, StateStore};
