//! spreadbot: MEXC futures spread-arbitrage engine.
//!
//! Main application that orchestrates all components:
//! - Signal source (HTTP poll or WebSocket push)
//! - Order engine with leverage negotiation and protective orders
//! - Per-account position monitors
//! - Token book bootstrap and reload

pub mod app;
pub mod config;
pub mod error;
pub mod tokens;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
