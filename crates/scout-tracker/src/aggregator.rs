//! Ranking metric aggregation.
//!
//! Reads event history and the latest snapshot of every active trader,
//! derives per-trader metrics, then scores all traders relative to each
//! other. Only the metric table is written.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use scout_core::{ChangeEvent, ChangeKind, PositionSnapshot, RankingMetric, Trader};
use scout_store::TraderStore;
use scout_telemetry::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WEIGHT_WIN_RATE: f64 = 0.30;
const WEIGHT_VOLUME: f64 = 0.20;
const WEIGHT_DRAWDOWN: f64 = 0.25;
const WEIGHT_RISK: f64 = 0.15;
const WEIGHT_MAX_PROFIT: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
        }
    }
}

/// Derive the unscored metric of one trader.
///
/// `events` must be in emission order. PnL figures come from the estimates
/// carried by reducing events; `max_loss` is reported as a positive magnitude.
pub fn compute_metric(
    trader: &Trader,
    events: &[ChangeEvent],
    latest: Option<&PositionSnapshot>,
    now: DateTime<Utc>,
) -> RankingMetric {
    let age = trader.age_days(now);
    if events.is_empty() {
        return RankingMetric::zero(trader.id.clone(), age, now);
    }

    let mut metric = RankingMetric::zero(trader.id.clone(), age, now);
    metric.event_count = events.len() as u64;

    let mut wins = 0u64;
    let mut cumulative = Decimal::ZERO;
    let mut peak = Decimal::ZERO;

    for event in events {
        if event.kind == ChangeKind::Opened {
            metric.total_volume = metric
                .total_volume
                .saturating_add(event.notional.unwrap_or_default());
        }
        if !event.kind.is_reducing() {
            continue;
        }

        metric.closed_count += 1;
        let pnl = event.pnl_estimate.unwrap_or_default();
        if pnl > Decimal::ZERO {
            wins += 1;
        }
        metric.max_profit = metric.max_profit.max(pnl);
        metric.max_loss = metric.max_loss.max(-pnl);

        cumulative = cumulative.saturating_add(pnl);
        peak = peak.max(cumulative);
        metric.max_drawdown = metric.max_drawdown.max(peak.saturating_sub(cumulative));
    }

    if metric.closed_count > 0 {
        metric.win_rate = wins as f64 / metric.closed_count as f64;
    }
    metric.risk_ratio = latest.map(risk_ratio).unwrap_or_default();
    metric
}

/// Open notional over account value. Zero when the account value is unknown
/// or the ratio does not fit in a `Decimal`.
fn risk_ratio(snapshot: &PositionSnapshot) -> Decimal {
    match snapshot.account_value {
        Some(value) if value > Decimal::ZERO => snapshot
            .open_notional()
            .and_then(|notional| notional.checked_div(value))
            .map(|ratio| ratio.round_dp(6))
            .unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

/// Min-max bounds of one factor across all traders.
struct Bounds {
    min: f64,
    max: f64,
}

impl Bounds {
    fn of(values: impl Iterator<Item = f64>) -> Self {
        values.fold(
            Self {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            },
            |b, v| Self {
                min: b.min.min(v),
                max: b.max.max(v),
            },
        )
    }

    /// Zero range normalizes to 0.
    fn normalize(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range > 0.0 {
            (value - self.min) / range
        } else {
            0.0
        }
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Fill `trader_score` of every metric, relative to the whole set.
///
/// Each factor is min-max normalized; drawdown and risk ratio are inverted so
/// that lower is better. Scores are clamped to `[0, 1]` and rounded to four
/// decimals.
pub fn score_metrics(metrics: &mut [RankingMetric]) {
    if metrics.is_empty() {
        return;
    }

    let win = Bounds::of(metrics.iter().map(|m| m.win_rate));
    let volume = Bounds::of(metrics.iter().map(|m| to_f64(m.total_volume)));
    let drawdown = Bounds::of(metrics.iter().map(|m| to_f64(m.max_drawdown)));
    let risk = Bounds::of(metrics.iter().map(|m| to_f64(m.risk_ratio)));
    let profit = Bounds::of(metrics.iter().map(|m| to_f64(m.max_profit)));

    for m in metrics.iter_mut() {
        let factors = [
            (win.normalize(m.win_rate), WEIGHT_WIN_RATE),
            (volume.normalize(to_f64(m.total_volume)), WEIGHT_VOLUME),
            (1.0 - drawdown.normalize(to_f64(m.max_drawdown)), WEIGHT_DRAWDOWN),
            (1.0 - risk.normalize(to_f64(m.risk_ratio)), WEIGHT_RISK),
            (profit.normalize(to_f64(m.max_profit)), WEIGHT_MAX_PROFIT),
        ];
        let score: f64 = factors
            .iter()
            .map(|(value, weight)| value.clamp(0.0, 1.0) * weight)
            .sum();
        m.trader_score = (score * 10_000.0).round() / 10_000.0;
    }
}

/// Periodic metric recomputation over all active traders.
pub struct MetricAggregator {
    config: AggregatorConfig,
    store: Arc<dyn TraderStore>,
    clock: Arc<dyn Clock>,
}

impl MetricAggregator {
    pub fn new(config: AggregatorConfig, store: Arc<dyn TraderStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Recompute and upsert every active trader's metric. Returns how many
    /// rows were written.
    pub fn run_once(&self) -> usize {
        let started = Instant::now();
        let now = self.clock.now();

        let traders = self.store.active_traders();
        if traders.is_empty() {
            debug!("No active traders to aggregate");
            return 0;
        }

        let mut metrics: Vec<RankingMetric> = traders
            .iter()
            .map(|trader| {
                let events = self.store.events_for(&trader.id);
                let latest = self.store.latest_snapshot(&trader.id);
                compute_metric(trader, &events, latest.as_ref(), now)
            })
            .collect();
        score_metrics(&mut metrics);

        let mut written = 0;
        for metric in metrics {
            let trader = metric.trader.clone();
            match self.store.upsert_metric(metric) {
                Ok(()) => written += 1,
                Err(e) => warn!(trader = %trader, error = %e, "Failed to upsert metric"),
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        Metrics::aggregation_duration(elapsed);
        info!(
            traders = traders.len(),
            written,
            elapsed_ms = (elapsed * 1000.0) as u64,
            "Ranking metrics updated"
        );
        written
    }

    /// Aggregate every `interval` until cancelled.
    ///
    /// Each pass runs on the blocking pool: with a journal, every upsert is a
    /// flushed file write.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.config.interval.as_secs(), "Metric aggregator started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Metric aggregator stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    if let Err(e) = tokio::task::spawn_blocking(move || this.run_once()).await {
                        warn!(error = %e, "Aggregation pass panicked");
                    }
                }
            }
        }
    }
}
