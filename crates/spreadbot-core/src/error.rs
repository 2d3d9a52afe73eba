//! Error types for spreadbot-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Insufficient margin: volume {volume} is below one step {step}")]
    InsufficientMargin { volume: String, step: String },

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Unknown wire code for {kind}: {code}")]
    UnknownCode { kind: &'static str, code: i64 },

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
