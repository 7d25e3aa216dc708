//! Store error types.

use scout_core::TraderId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown trader: {0}")]
    UnknownTrader(TraderId),
}

pub type StoreResult<T> = Result<T, StoreError>;
