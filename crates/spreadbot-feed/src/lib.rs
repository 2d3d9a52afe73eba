//! Spread signal source.
//!
//! Reads venue/DEX quotes from a polled snapshot or a WebSocket push feed,
//! measures the spread against the venue mid and queues qualifying
//! [`OrderCandidate`](spreadbot_core::OrderCandidate)s for the order engine.

pub mod detector;
pub mod error;
pub mod source;

pub use detector::{normalize_symbol, parse_entries, QuoteEntry, SpreadDetector, SpreadFilter};
pub use error::{FeedError, FeedResult};
pub use source::{FeedConfig, FeedMode, SignalSource};
