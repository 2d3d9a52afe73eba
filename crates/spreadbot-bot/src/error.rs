//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] spreadbot_core::CoreError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] spreadbot_exchange::ExchangeError),

    #[error("State store error: {0}")]
    Store(#[from] spreadbot_store::StoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] spreadbot_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
