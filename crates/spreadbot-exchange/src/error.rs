//! Exchange client error types.

use spreadbot_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Exchange rejected request: code={code} message={message}")]
    Rejected { code: i64, message: String },

    #[error("Leverage change failed: {0}")]
    Leverage(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        Self::HttpClient(e.to_string())
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
