//! State store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Stored value for {key} is not valid: {value}")]
    InvalidValue { key: String, value: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
