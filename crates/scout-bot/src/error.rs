//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Info client error: {0}")]
    Info(#[from] scout_info::InfoError),

    #[error("Store error: {0}")]
    Store(#[from] scout_store::StoreError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] scout_tracker::TrackerError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] scout_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
