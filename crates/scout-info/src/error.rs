//! Info client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfoError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body was not a valid clearinghouseState document.
    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Invalid position for {coin}: {reason}")]
    InvalidPosition { coin: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InfoError {
    /// Payload errors as opposed to transport errors.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::InvalidPosition { .. } | Self::Json(_)
        )
    }
}

pub type InfoResult<T> = Result<T, InfoError>;
