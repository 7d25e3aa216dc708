//! Tracker error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Stream error: {0}")]
    Ws(#[from] scout_ws::WsError),

    #[error("Info error: {0}")]
    Info(#[from] scout_info::InfoError),

    #[error("Store error: {0}")]
    Store(#[from] scout_store::StoreError),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
