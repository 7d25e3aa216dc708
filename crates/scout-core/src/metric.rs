//! Per-trader ranking row.

use crate::trader::TraderId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ranking metrics for one trader. Overwritten on every aggregation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingMetric {
    pub trader: TraderId,
    pub account_age_days: i64,
    /// Cumulative notional over `opened` events.
    pub total_volume: Decimal,
    pub event_count: u64,
    /// Number of events that realized PnL (closed, decreased, flipped).
    pub closed_count: u64,
    /// Fraction of realizing events with a positive PnL estimate.
    pub win_rate: f64,
    /// Largest peak-to-trough fall of cumulative estimated PnL.
    pub max_drawdown: Decimal,
    pub max_profit: Decimal,
    pub max_loss: Decimal,
    /// Open notional over account value, zero when unknown.
    pub risk_ratio: Decimal,
    /// Composite score in `[0, 1]`, relative to the other traders.
    pub trader_score: f64,
    pub updated_at: DateTime<Utc>,
}

impl RankingMetric {
    /// Metric for a trader with no events.
    pub fn zero(trader: TraderId, account_age_days: i64, updated_at: DateTime<Utc>) -> Self {
        Self {
            trader,
            account_age_days,
            total_volume: Decimal::ZERO,
            event_count: 0,
            closed_count: 0,
            win_rate: 0.0,
            max_drawdown: Decimal::ZERO,
            max_profit: Decimal::ZERO,
            max_loss: Decimal::ZERO,
            risk_ratio: Decimal::ZERO,
            trader_score: 0.0,
            updated_at,
        }
    }
}
