//! Position error types.

use spreadbot_core::CoreError;
use spreadbot_exchange::ExchangeError;
use spreadbot_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sizing error: {0}")]
    Sizing(#[from] CoreError),

    #[error("Close rejected for position {position_id}: code={code} message={message}")]
    CloseRejected {
        position_id: i64,
        code: i64,
        message: String,
    },
}

pub type PositionResult<T> = Result<T, PositionError>;
