//! Storage contract for the tracking pipeline.

use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use scout_core::{ChangeEvent, PositionSnapshot, RankingMetric, Trader, TraderId};

/// Keyed storage of traders, their snapshot/event history and metrics.
///
/// The store owns the refresh rotation: [`select_oldest`](Self::select_oldest)
/// and [`commit_refresh`](Self::commit_refresh) are the only ways to read or
/// advance it.
pub trait TraderStore: Send + Sync {
    /// Register identifiers not seen before. Known ids are left untouched.
    ///
    /// Returns how many traders were created.
    fn register_new(&self, ids: &[TraderId], now: DateTime<Utc>) -> StoreResult<usize>;

    fn trader(&self, id: &TraderId) -> Option<Trader>;

    /// Up to `n` active traders, least recently refreshed first.
    ///
    /// Never-refreshed traders come first. Ties on the timestamp are broken by
    /// refresh order, then by id.
    fn select_oldest(&self, n: usize) -> Vec<Trader>;

    fn latest_snapshot(&self, id: &TraderId) -> Option<PositionSnapshot>;

    /// Persist a snapshot with its events and advance the trader's
    /// last-refreshed timestamp, all or nothing.
    fn commit_refresh(
        &self,
        snapshot: PositionSnapshot,
        events: Vec<ChangeEvent>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    fn active_traders(&self) -> Vec<Trader>;

    fn active_count(&self) -> usize;

    /// All events of a trader in emission order.
    fn events_for(&self, id: &TraderId) -> Vec<ChangeEvent>;

    /// Soft-(de)activate. Returns whether the flag changed.
    fn set_active(&self, id: &TraderId, active: bool) -> StoreResult<bool>;

    fn upsert_metric(&self, metric: RankingMetric) -> StoreResult<()>;

    fn metric(&self, id: &TraderId) -> Option<RankingMetric>;

    /// All metrics, highest score first.
    fn ranking(&self) -> Vec<RankingMetric>;
}
