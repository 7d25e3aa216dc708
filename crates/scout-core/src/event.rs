//! Typed position change events.

use crate::decimal::{Price, Size};
use crate::trader::TraderId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Classification of a per-instrument size change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Opened,
    Closed,
    Increased,
    Decreased,
    Flipped,
}

impl ChangeKind {
    /// Classify a transition from `before` to `after`.
    ///
    /// Returns `None` when the sizes are equal.
    pub fn classify(before: Size, after: Size) -> Option<Self> {
        if before == after {
            return None;
        }
        let kind = if before.is_zero() {
            Self::Opened
        } else if after.is_zero() {
            Self::Closed
        } else if before.same_side(after) {
            if after.abs() > before.abs() {
                Self::Increased
            } else {
                Self::Decreased
            }
        } else {
            Self::Flipped
        };
        Some(kind)
    }

    /// True for kinds that realize some of the previous position.
    pub fn is_reducing(&self) -> bool {
        matches!(self, Self::Closed | Self::Decreased | Self::Flipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Closed => "closed",
            Self::Increased => "increased",
            Self::Decreased => "decreased",
            Self::Flipped => "flipped",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of one position change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub trader: TraderId,
    pub timestamp: DateTime<Utc>,
    pub kind: ChangeKind,
    pub instrument: String,
    pub before_size: Size,
    pub after_size: Size,
    pub reference_price: Option<Price>,
    /// Traded quantity times reference price.
    pub notional: Option<Decimal>,
    /// Previous unrealized PnL pro-rated by the closed fraction.
    pub pnl_estimate: Option<Decimal>,
}

impl ChangeEvent {
    /// Quantity actually traded to move from `before_size` to `after_size`.
    ///
    /// `None` when the quantity does not fit in a `Decimal`.
    pub fn traded_quantity(&self) -> Option<Decimal> {
        match self.kind {
            ChangeKind::Opened => Some(self.after_size.abs()),
            ChangeKind::Closed => Some(self.before_size.abs()),
            ChangeKind::Increased | ChangeKind::Decreased => self
                .after_size
                .inner()
                .checked_sub(self.before_size.inner())
                .map(|d| d.abs()),
            ChangeKind::Flipped => self.before_size.abs().checked_add(self.after_size.abs()),
        }
    }
}
