//! Reconnecting WebSocket client for the Hyperliquid trades feed.
//!
//! Provides:
//! - Explicit connection state machine
//!   (`Disconnected -> Connecting -> Subscribed -> Streaming -> Reconnecting`)
//! - Capped exponential backoff with a bounded retry count
//! - Subscription acknowledgement tracking
//! - Application-level heartbeat (ping/pong)
//! - Element-wise validation of `trades` payloads

pub mod backoff;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscription;

pub use backoff::BackoffPolicy;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{WsError, WsResult};
pub use message::{
    extract_subscription_type, ChannelMessage, PongMessage, TradePayload, TradesResult,
    WsMessage, WsRequest,
};
pub use subscription::SubscriptionManager;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
