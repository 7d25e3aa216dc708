//! Trades stream connection manager.
//!
//! Drives the connection lifecycle as an explicit state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Streaming
//!                     ^                          |
//!                     +------ Reconnecting <-----+ (error / close)
//! ```
//!
//! Failures are retried with capped exponential backoff. The failure counter
//! resets only when the WebSocket handshake succeeds. When the counter
//! exceeds `max_retries` the run ends with [`WsError::RetriesExhausted`].

use crate::backoff::BackoffPolicy;
use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{WsMessage, WsRequest};
use crate::subscription::SubscriptionManager;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use scout_telemetry::Metrics;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Instruments to subscribe to on every connect.
    pub instruments: Vec<String>,
    pub backoff: BackoffPolicy,
    /// Silence before an application-level ping is sent.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this after a ping.
    pub heartbeat_timeout_ms: u64,
    /// Pause between subscribe requests, used to drain responses.
    pub subscribe_pacing_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.hyperliquid.xyz/ws".to_string(),
            instruments: Vec::new(),
            backoff: BackoffPolicy::default(),
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            subscribe_pacing_ms: 50,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// All subscribe requests sent on a live socket.
    Subscribed,
    /// At least one trades payload received since subscribing.
    Streaming,
    /// Waiting out a backoff delay.
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trades stream connection manager.
///
/// Forwards every data message (anything that is not a pong or a
/// subscription ack) to `message_tx`.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    subscriptions: SubscriptionManager,
    heartbeat: HeartbeatManager,
    message_tx: mpsc::Sender<WsMessage>,
    consecutive_failures: AtomicU32,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        message_tx: mpsc::Sender<WsMessage>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let heartbeat =
            HeartbeatManager::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
        Self {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            subscriptions: SubscriptionManager::new(),
            heartbeat,
            message_tx,
            consecutive_failures: AtomicU32::new(0),
            shutdown_token,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Consecutive failed attempts since the last successful connect.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Signal graceful shutdown.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            debug!(from = %prev, to = %next, "Stream state transition");
            Metrics::ws_state_set(next.as_str());
        }
    }

    /// Run the connect / stream / reconnect loop until shutdown or until the
    /// retry bound is exceeded.
    ///
    /// Returns `Ok(())` on shutdown.
    pub async fn run(&self) -> WsResult<()> {
        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);
            self.subscriptions.reset();

            let reason = match self.try_connect().await {
                Ok(()) => {
                    info!("Trades stream ended");
                    "stream_ended"
                }
                Err(e) => {
                    warn!(error = %e, "Trades stream error");
                    e.reason()
                }
            };

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if self.config.backoff.is_exhausted(failures) {
                error!(failures, "Reconnect retries exhausted");
                self.set_state(ConnectionState::Disconnected);
                return Err(WsError::RetriesExhausted { attempts: failures });
            }

            self.set_state(ConnectionState::Reconnecting);
            Metrics::ws_reconnect(reason);

            let delay = self.config.backoff.delay_for(failures);
            warn!(attempt = failures, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self) -> WsResult<()> {
        info!(url = %self.config.url, "Connecting to trades stream");

        let connect = connect_async_tls_with_config(&self.config.url, None, true, None);
        let (ws_stream, _response) = tokio::select! {
            res = connect => res?,
            () = self.shutdown_token.cancelled() => return Ok(()),
        };
        // The handshake succeeded: backoff starts over from the base delay.
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let (mut write, mut read) = ws_stream.split();

        self.subscribe_all(&mut write, &mut read).await?;
        self.set_state(ConnectionState::Subscribed);
        info!(
            count = self.config.instruments.len(),
            "Trade subscriptions sent"
        );

        self.heartbeat.reset();

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    self.handle_frame(msg, &mut write).await?;
                }

                () = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        error!("Heartbeat timeout");
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_heartbeat() {
                        let ping = serde_json::to_string(&WsRequest::ping())?;
                        write.send(Message::Text(ping)).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    /// Handle one frame from the socket. Errors end the connection.
    async fn handle_frame(
        &self,
        msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        write: &mut WsSink,
    ) -> WsResult<()> {
        match msg {
            Some(Ok(Message::Text(text))) => {
                self.handle_text_message(&text).await;
                Ok(())
            }
            Some(Ok(Message::Ping(data))) => {
                self.heartbeat.record_message();
                write.send(Message::Pong(data)).await?;
                Ok(())
            }
            Some(Ok(Message::Pong(_))) => {
                self.heartbeat.record_pong();
                Ok(())
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (f.code.into(), f.reason.to_string()))
                    .unwrap_or((1000, "Normal close".to_string()));
                warn!(code, %reason, "Trades stream closed by server");
                Err(WsError::ConnectionClosed { code, reason })
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(WsError::ConnectionClosed {
                code: 1006,
                reason: "Stream ended".to_string(),
            }),
            Some(Ok(_)) => Ok(()),
        }
    }

    /// Parse and route one text frame. Malformed frames are logged and skipped.
    async fn handle_text_message(&self, text: &str) {
        self.heartbeat.record_message();

        let msg: WsMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, len = text.len(), "Skipping malformed stream message");
                Metrics::malformed("ws_message");
                return;
            }
        };

        match &msg {
            WsMessage::Pong(pong) => {
                if pong.is_pong() {
                    self.heartbeat.record_pong();
                }
                return;
            }
            WsMessage::Channel(channel_msg) => match channel_msg.channel.as_str() {
                "pong" => {
                    self.heartbeat.record_pong();
                    return;
                }
                "subscriptionResponse" => {
                    debug!(data = ?channel_msg.data, "Received subscription response");
                    self.subscriptions.handle_response(&channel_msg.data);
                    return;
                }
                "error" => {
                    warn!(data = ?channel_msg.data, "Received error channel message");
                }
                _ => {}
            },
        }

        if msg.is_trades() && self.state() == ConnectionState::Subscribed {
            self.set_state(ConnectionState::Streaming);
        }

        if self.message_tx.send(msg).await.is_err() {
            warn!("Message receiver dropped");
        }
    }

    /// Send one trades subscription per instrument, draining responses
    /// between sends.
    async fn subscribe_all(&self, write: &mut WsSink, read: &mut WsSource) -> WsResult<()> {
        for coin in &self.config.instruments {
            let request = serde_json::to_string(&WsRequest::subscribe_trades(coin))?;
            write.send(Message::Text(request)).await?;
            self.subscriptions.add_subscription(coin);
            debug!(coin = %coin, "Subscribed to trades");

            self.drain_and_wait(write, read, self.config.subscribe_pacing_ms)
                .await?;
        }
        Ok(())
    }

    /// Drain pending frames for up to `wait_ms`.
    async fn drain_and_wait(
        &self,
        write: &mut WsSink,
        read: &mut WsSource,
        wait_ms: u64,
    ) -> WsResult<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);

        loop {
            tokio::select! {
                msg = read.next() => {
                    self.handle_frame(msg, write).await?;
                }
                () = tokio::time::sleep_until(deadline) => break,
                () = self.shutdown_token.cancelled() => break,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.backoff.base_delay_ms, 2_000);
        assert_eq!(config.backoff.max_delay_ms, 60_000);
        assert_eq!(config.backoff.max_retries, 5);
        assert!(config.url.starts_with("wss://"));
    }

    #[test]
    fn test_initial_state() {
        let (tx, _rx) = mpsc::channel(1);
        let manager = ConnectionManager::new(
            ConnectionConfig::default(),
            tx,
            CancellationToken::new(),
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_cancelled() {
        let (tx, _rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        token.cancel();
        let manager = ConnectionManager::new(ConnectionConfig::default(), tx, token);

        manager.run().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_endpoint_exhausts_retries() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, _rx) = mpsc::channel(1);
        let config = ConnectionConfig {
            url: format!("ws://127.0.0.1:{port}"),
            instruments: vec!["BTC".to_string()],
            backoff: BackoffPolicy {
                max_retries: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let manager = ConnectionManager::new(config, tx, CancellationToken::new());

        let err = manager.run().await.unwrap_err();
        assert!(matches!(err, WsError::RetriesExhausted { attempts: 4 }));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(ConnectionState::Subscribed.to_string(), "subscribed");
        assert_eq!(ConnectionState::Streaming.as_str(), "streaming");
    }
}
