//! Point-in-time position state of one trader.

use crate::decimal::{Price, Size};
use crate::trader::TraderId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single open position on one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub size: Size,
    pub entry_price: Option<Price>,
    pub unrealized_pnl: Option<Decimal>,
}

impl Position {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            entry_price: None,
            unrealized_pnl: None,
        }
    }

    pub fn with_entry_price(mut self, price: Price) -> Self {
        self.entry_price = Some(price);
        self
    }

    pub fn with_unrealized_pnl(mut self, pnl: Decimal) -> Self {
        self.unrealized_pnl = Some(pnl);
        self
    }

    /// Open notional at entry price, if the price is known.
    pub fn notional(&self) -> Option<Decimal> {
        self.entry_price.and_then(|px| self.size.notional(px))
    }
}

/// Positions of a trader at a capture instant.
///
/// Instruments are keyed in a `BTreeMap`, so iteration is always in sorted
/// order. Flat instruments are not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub trader: TraderId,
    pub positions: BTreeMap<String, Position>,
    pub account_value: Option<Decimal>,
    pub captured_at: DateTime<Utc>,
}

impl PositionSnapshot {
    pub fn empty(trader: TraderId, captured_at: DateTime<Utc>) -> Self {
        Self {
            trader,
            positions: BTreeMap::new(),
            account_value: None,
            captured_at,
        }
    }

    /// Insert a position; zero sizes are dropped.
    pub fn insert(&mut self, coin: impl Into<String>, position: Position) {
        let coin = coin.into();
        if position.size.is_zero() {
            self.positions.remove(&coin);
        } else {
            self.positions.insert(coin, position);
        }
    }

    pub fn with_position(mut self, coin: impl Into<String>, position: Position) -> Self {
        self.insert(coin, position);
        self
    }

    pub fn with_account_value(mut self, value: Decimal) -> Self {
        self.account_value = Some(value);
        self
    }

    pub fn get(&self, coin: &str) -> Option<&Position> {
        self.positions.get(coin)
    }

    /// Signed size on `coin`, zero when flat.
    pub fn size_of(&self, coin: &str) -> Size {
        self.positions.get(coin).map(|p| p.size).unwrap_or(Size::ZERO)
    }

    /// Sum of open notional across positions with a known entry price.
    ///
    /// `None` when the sum does not fit in a `Decimal`.
    pub fn open_notional(&self) -> Option<Decimal> {
        self.positions
            .values()
            .filter_map(Position::notional)
            .try_fold(Decimal::ZERO, |acc, n| acc.checked_add(n))
    }
}
