//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    /// Terminal: the stream gave up after too many consecutive failures.
    #[error("Reconnect retries exhausted after {attempts} consecutive failures")]
    RetriesExhausted { attempts: u32 },

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Short label for reconnect metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) | Self::Tungstenite(_) => "connect_error",
            Self::ConnectionClosed { .. } => "closed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Json(_) => "json",
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;
