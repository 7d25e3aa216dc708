//! Tracked participants.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque trader identifier.
///
/// Identifiers are trimmed. Hex addresses (`0x...`) are lower-cased so that
/// the same wallet reported with different casing maps to one entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraderId(String);

impl TraderId {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidTraderId(raw.to_string()));
        }
        let is_hex = trimmed.len() > 2
            && trimmed
                .get(..2)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("0x"));
        if is_hex {
            return Ok(Self(trimmed.to_ascii_lowercase()));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TraderId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TraderId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TraderId> for String {
    fn from(id: TraderId) -> Self {
        id.0
    }
}

/// A discovered participant and its position in the refresh rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trader {
    pub id: TraderId,
    pub first_seen_at: DateTime<Utc>,
    /// `None` until the first successful refresh. Never moves backwards.
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Trader {
    /// New entity as registered by discovery.
    pub fn discovered(id: TraderId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            first_seen_at: now,
            last_refreshed_at: None,
            active: true,
        }
    }

    /// Advance the refresh timestamp, keeping it monotonic.
    pub fn mark_refreshed(&mut self, at: DateTime<Utc>) {
        self.last_refreshed_at = Some(match self.last_refreshed_at {
            Some(prev) if prev > at => prev,
            _ => at,
        });
    }

    /// Whole days since first discovery.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.first_seen_at).num_days().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_trader_id_normalizes_addresses() {
        let id = TraderId::parse("  0xAbCdEF0123 ").unwrap();
        assert_eq!(id.as_str(), "0xabcdef0123");

        let upper = TraderId::parse("0XABCDEF0123").unwrap();
        assert_eq!(upper, id);
    }

    #[test]
    fn test_trader_id_keeps_opaque_strings() {
        let id = TraderId::parse("VaultAlpha").unwrap();
        assert_eq!(id.to_string(), "VaultAlpha");
    }

    #[test]
    fn test_trader_id_rejects_empty() {
        assert!(TraderId::parse("").is_err());
        assert!(TraderId::parse("   ").is_err());
    }

    #[test]
    fn test_trader_id_serde_roundtrip_validates() {
        let id: TraderId = serde_json::from_str("\"0xABC1\"").unwrap();
        assert_eq!(id.as_str(), "0xabc1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"0xabc1\"");
        assert!(serde_json::from_str::<TraderId>("\"\"").is_err());
    }

    #[test]
    fn test_mark_refreshed_is_monotonic() {
        let mut trader = Trader::discovered(TraderId::parse("0x1").unwrap(), ts(0));
        assert!(trader.last_refreshed_at.is_none());

        trader.mark_refreshed(ts(100));
        trader.mark_refreshed(ts(50));
        assert_eq!(trader.last_refreshed_at, Some(ts(100)));

        trader.mark_refreshed(ts(200));
        assert_eq!(trader.last_refreshed_at, Some(ts(200)));
    }

    #[test]
    fn test_age_days_whole_days() {
        let trader = Trader::discovered(TraderId::parse("0x1").unwrap(), ts(0));
        let now = ts(0) + Duration::hours(71);
        assert_eq!(trader.age_days(now), 2);
        assert_eq!(trader.age_days(ts(-10)), 0);
    }
}
