//! WebSocket message types.

use serde::{Deserialize, Serialize};

/// Name of the trade feed channel.
pub const TRADES_CHANNEL: &str = "trades";

/// A single public trade as pushed on the `trades` channel.
///
/// Only `coin` and `users` are required. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePayload {
    pub coin: String,
    /// "B" (buy) or "A" (sell) aggressor side.
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub px: String,
    #[serde(default)]
    pub sz: String,
    /// Exchange timestamp in milliseconds.
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub tid: u64,
    /// `[buyer, seller]`.
    #[serde(alias = "participants")]
    pub users: Vec<String>,
}

/// Result of parsing a `trades` message element by element.
#[derive(Debug, Clone, Default)]
pub struct TradesResult {
    pub trades: Vec<TradePayload>,
    /// Entries that failed validation and were skipped.
    pub failed_count: usize,
}

/// Extract subscription type from subscriptionResponse data.
///
/// Handles both formats:
/// - Official: `data.subscription.type`
/// - Fallback: `data.type`
pub fn extract_subscription_type(data: &serde_json::Value) -> Option<&str> {
    data.get("subscription")
        .and_then(|s| s.get("type"))
        .and_then(|v| v.as_str())
        .or_else(|| data.get("type").and_then(|v| v.as_str()))
}

/// Extract the coin a subscriptionResponse refers to.
pub fn extract_subscription_coin(data: &serde_json::Value) -> Option<&str> {
    data.get("subscription")
        .and_then(|s| s.get("coin"))
        .and_then(|v| v.as_str())
        .or_else(|| data.get("coin").and_then(|v| v.as_str()))
}

/// Incoming WebSocket message wrapper.
///
/// The `channel` field determines the message type:
/// - "pong": heartbeat response
/// - "subscriptionResponse": subscription confirmation
/// - "trades": trade batches
/// - "error": server-side error notice
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsMessage {
    /// Pong response (no data field, just channel: "pong").
    Pong(PongMessage),
    /// Channel-based message (all other messages with data field).
    Channel(ChannelMessage),
}

impl WsMessage {
    pub fn is_pong(&self) -> bool {
        matches!(self, Self::Pong(p) if p.is_pong())
    }

    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Pong(p) => Some(&p.channel),
            Self::Channel(c) => Some(&c.channel),
        }
    }

    pub fn is_trades(&self) -> bool {
        matches!(self, Self::Channel(c) if c.channel == TRADES_CHANNEL)
    }

    /// Parse a `trades` message into validated trades.
    ///
    /// `data` is normally an array; a single object is accepted too. Each
    /// element is parsed on its own so one bad entry does not drop the batch.
    /// Non-trade channels yield an empty result.
    pub fn as_trades(&self) -> TradesResult {
        let Self::Channel(c) = self else {
            return TradesResult::default();
        };
        if c.channel != TRADES_CHANNEL {
            return TradesResult::default();
        }

        match &c.data {
            serde_json::Value::Array(arr) => {
                let mut trades = Vec::with_capacity(arr.len());
                let mut failed_count = 0;

                for v in arr {
                    match TradePayload::deserialize(v) {
                        Ok(trade) => trades.push(trade),
                        Err(e) => {
                            tracing::debug!(error = %e, element = ?v, "Skipping malformed trade");
                            failed_count += 1;
                        }
                    }
                }

                TradesResult {
                    trades,
                    failed_count,
                }
            }
            serde_json::Value::Object(_) => match TradePayload::deserialize(&c.data) {
                Ok(trade) => TradesResult {
                    trades: vec![trade],
                    failed_count: 0,
                },
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed trade object");
                    TradesResult {
                        trades: vec![],
                        failed_count: 1,
                    }
                }
            },
            other => {
                tracing::warn!(data_type = ?other, "trades data is neither Array nor Object");
                TradesResult {
                    trades: vec![],
                    failed_count: 1,
                }
            }
        }
    }
}

/// Channel-based message. Used for all messages that include a data field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    pub data: serde_json::Value,
}

/// Pong response message (`{"channel": "pong"}`).
/// `deny_unknown_fields` keeps it distinct from `ChannelMessage` in the untagged enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PongMessage {
    pub channel: String,
}

impl PongMessage {
    pub fn is_pong(&self) -> bool {
        self.channel == "pong"
    }
}

/// Outgoing request to WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<serde_json::Value>,
}

impl WsRequest {
    pub fn ping() -> Self {
        Self {
            method: "ping".to_string(),
            subscription: None,
        }
    }

    pub fn subscribe(subscription: serde_json::Value) -> Self {
        Self {
            method: "subscribe".to_string(),
            subscription: Some(subscription),
        }
    }

    /// `{"method":"subscribe","subscription":{"type":"trades","coin":<coin>}}`
    pub fn subscribe_trades(coin: &str) -> Self {
        Self::subscribe(serde_json::json!({
            "type": TRADES_CHANNEL,
            "coin": coin,
        }))
    }
}
