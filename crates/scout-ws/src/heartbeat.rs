//! Heartbeat tracking for the trades stream.
//!
//! The feed can be quiet for long stretches on illiquid instruments, so an
//! application-level `{"method":"ping"}` is sent after `interval` of silence.
//! A missing pong within `timeout` marks the connection dead.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct HeartbeatState {
    last_message: Instant,
    ping_sent_at: Option<Instant>,
}

/// Heartbeat monitor. Uses tokio time so it follows a paused test clock.
#[derive(Debug)]
pub struct HeartbeatManager {
    interval: Duration,
    timeout: Duration,
    state: Mutex<HeartbeatState>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            state: Mutex::new(HeartbeatState {
                last_message: Instant::now(),
                ping_sent_at: None,
            }),
        }
    }

    /// Reset on a fresh connection.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_message = Instant::now();
        state.ping_sent_at = None;
    }

    pub fn record_ping(&self) {
        self.state.lock().ping_sent_at = Some(Instant::now());
    }

    pub fn record_pong(&self) {
        let mut state = self.state.lock();
        if let Some(sent) = state.ping_sent_at.take() {
            debug!(rtt_ms = sent.elapsed().as_millis() as u64, "Received pong");
        }
    }

    /// Any inbound frame counts as liveness.
    pub fn record_message(&self) {
        self.state.lock().last_message = Instant::now();
    }

    pub fn is_waiting_for_pong(&self) -> bool {
        self.state.lock().ping_sent_at.is_some()
    }

    pub fn is_timed_out(&self) -> bool {
        self.state
            .lock()
            .ping_sent_at
            .is_some_and(|sent| sent.elapsed() > self.timeout)
    }

    /// A ping is due after `interval` of silence, unless one is outstanding.
    pub fn should_send_heartbeat(&self) -> bool {
        let state = self.state.lock();
        state.ping_sent_at.is_none() && state.last_message.elapsed() >= self.interval
    }

    /// Sleep until the next check point.
    pub async fn wait_for_check(&self) {
        let step = (self.interval / 2).min(self.timeout).max(Duration::from_millis(10));
        tokio::time::sleep(step).await;
    }
}
