//! Core domain types for the Hyperliquid trader scout.
//!
//! This crate provides the types shared by every stage of the pipeline:
//! - `TraderId`, `Trader`: discovered participants and their queue position
//! - `Price`, `Size`: precision-safe numeric types (sizes are signed)
//! - `PositionSnapshot`: point-in-time positions of one trader
//! - `ChangeEvent`, `ChangeKind`: typed position deltas
//! - `RankingMetric`: per-trader leaderboard row

pub mod decimal;
pub mod error;
pub mod event;
pub mod metric;
pub mod snapshot;
pub mod trader;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use event::{ChangeEvent, ChangeKind};
pub use metric::RankingMetric;
pub use snapshot::{Position, PositionSnapshot};
pub use trader::{Trader, TraderId};
