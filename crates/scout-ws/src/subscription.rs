//! Subscription tracking for the trades feed.
//!
//! Every configured instrument gets one `trades` subscription per connection.
//! The server confirms each with a `subscriptionResponse`; acknowledgements are
//! tracked so that a partially subscribed stream is visible in logs.

use crate::message::{extract_subscription_coin, extract_subscription_type, TRADES_CHANNEL};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct SubscriptionState {
    requested: BTreeSet<String>,
    acked: BTreeSet<String>,
}

/// Tracks requested and acknowledged trade subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    state: RwLock<SubscriptionState>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a subscribe request for `coin` was sent.
    pub fn add_subscription(&self, coin: &str) {
        self.state.write().requested.insert(coin.to_string());
    }

    /// Handle a `subscriptionResponse` payload.
    ///
    /// Returns `true` when it acknowledged a requested trades subscription.
    /// Unsubscribe confirmations and other channel types are ignored.
    pub fn handle_response(&self, data: &serde_json::Value) -> bool {
        let is_subscribe = data
            .get("method")
            .and_then(|v| v.as_str())
            .is_some_and(|m| m == "subscribe");
        if !is_subscribe || extract_subscription_type(data) != Some(TRADES_CHANNEL) {
            return false;
        }
        let Some(coin) = extract_subscription_coin(data) else {
            return false;
        };

        let mut state = self.state.write();
        if !state.requested.contains(coin) {
            debug!(coin, "Ack for a subscription we did not request");
            return false;
        }
        if state.acked.insert(coin.to_string()) && state.acked.len() == state.requested.len() {
            info!(count = state.acked.len(), "All trade subscriptions acknowledged");
        }
        true
    }

    pub fn is_fully_acked(&self) -> bool {
        let state = self.state.read();
        !state.requested.is_empty() && state.acked.len() == state.requested.len()
    }

    /// Requested instruments still waiting for an ack.
    pub fn pending(&self) -> Vec<String> {
        let state = self.state.read();
        state.requested.difference(&state.acked).cloned().collect()
    }

    /// Clear all state. Called before every (re)connect.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.requested.clear();
        state.acked.clear();
    }
}
