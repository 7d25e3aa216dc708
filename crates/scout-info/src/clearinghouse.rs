//! `clearinghouseState` response types.
//!
//! Endpoint: POST /info with `{"type": "clearinghouseState", "user": "<address>"}`.
//! Numeric fields arrive as strings. Unknown fields are ignored.

use crate::error::{InfoError, InfoResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use scout_core::{Position, PositionSnapshot, Price, Size, TraderId};
use serde::{Deserialize, Serialize};

/// clearinghouseState response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClearinghouseStateResponse {
    #[serde(rename = "marginSummary")]
    pub margin_summary: Option<MarginSummary>,
    #[serde(rename = "assetPositions", default)]
    pub asset_positions: Vec<AssetPositionEntry>,
    /// Server timestamp in milliseconds.
    pub time: Option<u64>,
}

/// Margin summary.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarginSummary {
    #[serde(rename = "accountValue")]
    pub account_value: String,
    #[serde(rename = "totalNtlPos", default)]
    pub total_notional_position: Option<String>,
}

/// One entry of `assetPositions`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetPositionEntry {
    pub position: AssetPositionData,
    /// "oneWay" or "twoWay".
    #[serde(rename = "type", default)]
    pub position_type: Option<String>,
}

/// Position data within an `assetPositions` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetPositionData {
    pub coin: String,
    /// Signed size: positive = long, negative = short.
    pub szi: String,
    #[serde(rename = "entryPx", default)]
    pub entry_px: Option<String>,
    #[serde(rename = "unrealizedPnl", default)]
    pub unrealized_pnl: Option<String>,
    #[serde(rename = "positionValue", default)]
    pub position_value: Option<String>,
}

/// Largest magnitude accepted for any numeric field. Keeps every product of
/// two fields well inside the `Decimal` range.
const MAX_MAGNITUDE: i64 = 1_000_000_000_000_000;

fn in_range(value: Decimal) -> bool {
    value.abs() <= Decimal::from(MAX_MAGNITUDE)
}

fn parse_decimal(coin: &str, field: &str, raw: &str) -> InfoResult<Decimal> {
    let value: Decimal = raw.parse().map_err(|e| InfoError::InvalidPosition {
        coin: coin.to_string(),
        reason: format!("{field}={raw:?}: {e}"),
    })?;
    if !in_range(value) {
        return Err(InfoError::InvalidPosition {
            coin: coin.to_string(),
            reason: format!("{field}={raw:?}: out of range"),
        });
    }
    Ok(value)
}

fn parse_optional(coin: &str, field: &str, raw: Option<&str>) -> InfoResult<Option<Decimal>> {
    raw.map(|s| parse_decimal(coin, field, s)).transpose()
}

impl AssetPositionData {
    /// Validate into a typed position.
    pub fn to_position(&self) -> InfoResult<Position> {
        if self.coin.trim().is_empty() {
            return Err(InfoError::InvalidPosition {
                coin: self.coin.clone(),
                reason: "empty coin".to_string(),
            });
        }
        let size = Size::new(parse_decimal(&self.coin, "szi", &self.szi)?);
        let entry_price = parse_optional(&self.coin, "entryPx", self.entry_px.as_deref())?
            .map(Price::new);
        let unrealized_pnl =
            parse_optional(&self.coin, "unrealizedPnl", self.unrealized_pnl.as_deref())?;

        Ok(Position {
            size,
            entry_price,
            unrealized_pnl,
        })
    }
}

impl ClearinghouseStateResponse {
    /// Account value from the margin summary, if present.
    pub fn account_value(&self) -> InfoResult<Option<Decimal>> {
        self.margin_summary
            .as_ref()
            .map(|m| {
                let value: Decimal = m
                    .account_value
                    .parse()
                    .map_err(|e| InfoError::Malformed(format!("accountValue: {e}")))?;
                if !in_range(value) {
                    return Err(InfoError::Malformed(format!(
                        "accountValue: {} out of range",
                        m.account_value
                    )));
                }
                Ok(value)
            })
            .transpose()
    }

    /// Validate the whole response into a snapshot captured at `captured_at`.
    ///
    /// Any invalid position rejects the whole snapshot, so a trader is never
    /// diffed against a partially parsed state. Flat positions are omitted.
    pub fn to_snapshot(
        &self,
        trader: TraderId,
        captured_at: DateTime<Utc>,
    ) -> InfoResult<PositionSnapshot> {
        let mut snapshot = PositionSnapshot::empty(trader, captured_at);
        snapshot.account_value = self.account_value()?;

        for entry in &self.asset_positions {
            let position = entry.position.to_position()?;
            snapshot.insert(entry.position.coin.clone(), position);
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"{
        "marginSummary": {"accountValue": "12500.5", "totalNtlPos": "9000.0", "totalRawUsd": "1"},
        "crossMarginSummary": {"accountValue": "12500.5"},
        "withdrawable": "100.0",
        "assetPositions": [
            {"type": "oneWay", "position": {
                "coin": "BTC", "szi": "0.15", "entryPx": "60000.0",
                "unrealizedPnl": "150.25", "leverage": {"type": "cross", "value": 10}
            }},
            {"type": "oneWay", "position": {
                "coin": "ETH", "szi": "-2.0", "entryPx": "3000", "unrealizedPnl": "-40"
            }},
            {"type": "oneWay", "position": {"coin": "SOL", "szi": "0.0"}}
        ],
        "time": 1700000000000
    }"#;

    fn trader() -> TraderId {
        TraderId::parse("0xabc").unwrap()
    }

    #[test]
    fn test_to_snapshot() {
        let resp: ClearinghouseStateResponse = serde_json::from_str(SAMPLE).unwrap();
        let snap = resp.to_snapshot(trader(), Utc::now()).unwrap();

        assert_eq!(snap.account_value, Some(dec!(12500.5)));
        assert_eq!(snap.positions.len(), 2);

        let btc = snap.get("BTC").unwrap();
        assert_eq!(btc.size, Size::new(dec!(0.15)));
        assert_eq!(btc.entry_price, Some(Price::new(dec!(60000.0))));
        assert_eq!(btc.unrealized_pnl, Some(dec!(150.25)));

        assert!(snap.size_of("ETH").is_short());
        assert!(snap.get("SOL").is_none());
    }

    #[test]
    fn test_empty_account() {
        let resp: ClearinghouseStateResponse = serde_json::from_str("{}").unwrap();
        let snap = resp.to_snapshot(trader(), Utc::now()).unwrap();
        assert!(snap.positions.is_empty());
        assert_eq!(snap.account_value, None);
    }

    #[test]
    fn test_bad_szi_rejects_snapshot() {
        let raw = r#"{"assetPositions": [{"position": {"coin": "BTC", "szi": "abc"}}]}"#;
        let resp: ClearinghouseStateResponse = serde_json::from_str(raw).unwrap();

        let err = resp.to_snapshot(trader(), Utc::now()).unwrap_err();
        assert!(err.is_malformed());
        assert!(matches!(err, InfoError::InvalidPosition { ref coin, .. } if coin == "BTC"));
    }

    #[test]
    fn test_out_of_range_values_reject_snapshot() {
        let raw = r#"{"assetPositions": [{"position": {
            "coin": "BTC", "szi": "79228162514264337593543950335", "entryPx": "2"
        }}]}"#;
        let resp: ClearinghouseStateResponse = serde_json::from_str(raw).unwrap();
        let err = resp.to_snapshot(trader(), Utc::now()).unwrap_err();
        assert!(err.is_malformed());

        let raw = r#"{"marginSummary": {"accountValue": "-100000000000000000000"}}"#;
        let resp: ClearinghouseStateResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.to_snapshot(trader(), Utc::now()).is_err());

        let raw = r#"{"assetPositions": [{"position": {
            "coin": "BTC", "szi": "1000000000000000", "entryPx": "1000000000000000"
        }}]}"#;
        let resp: ClearinghouseStateResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.to_snapshot(trader(), Utc::now()).is_ok());
    }

    #[test]
    fn test_missing_szi_fails_deserialization() {
        let raw = r#"{"assetPositions": [{"position": {"coin": "BTC"}}]}"#;
        assert!(serde_json::from_str::<ClearinghouseStateResponse>(raw).is_err());
    }
}
