//! Executor error types.

use spreadbot_core::CoreError;
use spreadbot_exchange::ExchangeError;
use spreadbot_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sizing error: {0}")]
    Sizing(#[from] CoreError),

    #[error("Order rejected: code={code}, message={message}")]
    Rejected { code: i64, message: String },

    #[error("Candidate queue closed")]
    QueueClosed,
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
