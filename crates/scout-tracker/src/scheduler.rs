//! Budgeted batch refresh of the stalest traders.
//!
//! Each cycle:
//! 1. Select up to `batch_size` active traders, least recently refreshed first
//! 2. Spend budget per trader; traders that do not fit are deferred
//! 3. Fetch, diff against the latest snapshot, commit atomically
//! 4. Publish the committed events
//!
//! Failed or deferred traders keep their place at the head of the queue, so
//! the next cycle retries them first.

use crate::budget::{BudgetConfig, RateBudget};
use crate::clock::Clock;
use crate::diff::diff_positions;
use crate::error::{TrackerError, TrackerResult};
use crate::fetcher::StateFetcher;
use crate::publisher::EventPublisher;
use futures_util::stream::{self, StreamExt};
use scout_core::{Trader, TraderId};
use scout_store::TraderStore;
use scout_telemetry::Metrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scheduler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum traders refreshed per cycle.
    pub batch_size: usize,
    /// Cycle cadence.
    pub interval: Duration,
    /// Request weight of one state fetch.
    pub fetch_weight: u32,
    /// In-flight fetches within one batch.
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            interval: Duration::from_secs(75),
            fetch_weight: 20,
            concurrency: 8,
        }
    }
}

impl SchedulerConfig {
    /// Weight of a full batch.
    pub fn batch_weight(&self) -> u32 {
        u32::try_from(self.batch_size)
            .unwrap_or(u32::MAX)
            .saturating_mul(self.fetch_weight)
    }

    pub fn validate(&self, budget: &BudgetConfig) -> TrackerResult<()> {
        if self.batch_size == 0 {
            return Err(TrackerError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.interval.is_zero() {
            return Err(TrackerError::InvalidConfig("interval must be > 0".into()));
        }
        if self.fetch_weight == 0 {
            return Err(TrackerError::InvalidConfig("fetch_weight must be > 0".into()));
        }
        if self.batch_weight() > budget.ceiling {
            return Err(TrackerError::InvalidConfig(format!(
                "batch weight {} exceeds rate ceiling {}",
                self.batch_weight(),
                budget.ceiling
            )));
        }
        Ok(())
    }
}

/// Result of refreshing one trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOutcome {
    /// Snapshot committed with this many events.
    Refreshed { events: usize },
    /// Fetch failed; retried next cycle.
    Failed,
    /// No budget left in this window.
    Deferred,
    /// Fetch succeeded but the commit did not.
    PersistFailed,
}

impl EntityOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refreshed { .. } => "refreshed",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
            Self::PersistFailed => "persist_failed",
        }
    }
}

/// Summary of one scheduler cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The cycle did not run because another one was in flight.
    pub skipped: bool,
    pub selected: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub persist_failed: usize,
    pub events: usize,
    pub publish_failures: usize,
    pub outcomes: Vec<(TraderId, EntityOutcome)>,
}

impl CycleReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn record(&mut self, trader: TraderId, outcome: EntityOutcome, publish_failures: usize) {
        match outcome {
            EntityOutcome::Refreshed { events } => {
                self.refreshed += 1;
                self.events += events;
            }
            EntityOutcome::Failed => self.failed += 1,
            EntityOutcome::Deferred => self.deferred += 1,
            EntityOutcome::PersistFailed => self.persist_failed += 1,
        }
        self.publish_failures += publish_failures;
        self.outcomes.push((trader, outcome));
    }

    pub fn outcome_of(&self, trader: &TraderId) -> Option<EntityOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == trader)
            .map(|(_, o)| *o)
    }
}

/// Clears the running flag when a cycle ends, including on panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Batch tracking scheduler. A single instance owns the refresh rotation.
pub struct BatchScheduler {
    config: SchedulerConfig,
    store: Arc<dyn TraderStore>,
    fetcher: Arc<dyn StateFetcher>,
    budget: Arc<RateBudget>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

impl BatchScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TraderStore>,
        fetcher: Arc<dyn StateFetcher>,
        budget: Arc<RateBudget>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            budget,
            publisher,
            clock,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one cycle. Returns a skipped report if a cycle is already running.
    pub async fn run_cycle(&self) -> CycleReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous tracking cycle still running, skipping");
            Metrics::batch_skipped();
            return CycleReport::skipped();
        }
        let _guard = RunningGuard(&self.running);

        let selected = self.store.select_oldest(self.config.batch_size);
        let affordable = self.budget.affordable(self.config.fetch_weight);

        let mut report = CycleReport {
            selected: selected.len(),
            ..CycleReport::default()
        };
        if selected.is_empty() {
            debug!("No active traders to refresh");
            Metrics::tracked_traders(self.store.active_count());
            return report;
        }

        // Shrink the batch to what the window can still pay for.
        let split = affordable.min(selected.len());
        let (batch, deferred) = selected.split_at(split);
        if !deferred.is_empty() {
            debug!(
                deferred = deferred.len(),
                remaining = self.budget.remaining(),
                "Rate budget short, deferring part of the batch"
            );
        }
        for trader in deferred {
            report.record(trader.id.clone(), EntityOutcome::Deferred, 0);
        }

        let concurrency = self.config.concurrency.clamp(1, self.config.batch_size.max(1));
        let results: Vec<(TraderId, EntityOutcome, usize)> = stream::iter(batch.iter().cloned())
            .map(|trader| self.refresh_one(trader))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (trader, outcome, publish_failures) in results {
            report.record(trader, outcome, publish_failures);
        }

        Metrics::batch_outcome("refreshed", report.refreshed as u64);
        Metrics::batch_outcome("failed", report.failed as u64);
        Metrics::batch_outcome("deferred", report.deferred as u64);
        Metrics::batch_outcome("persist_failed", report.persist_failed as u64);
        Metrics::tracked_traders(self.store.active_count());

        info!(
            selected = report.selected,
            refreshed = report.refreshed,
            failed = report.failed,
            deferred = report.deferred,
            persist_failed = report.persist_failed,
            events = report.events,
            budget_used = self.budget.consumed(),
            "Tracking cycle complete"
        );
        report
    }

    /// Refresh one trader. Returns the outcome and the number of failed publishes.
    async fn refresh_one(&self, trader: Trader) -> (TraderId, EntityOutcome, usize) {
        let id = trader.id;

        if !self.budget.try_acquire(self.config.fetch_weight) {
            debug!(trader = %id, "Budget denied fetch, deferring");
            return (id, EntityOutcome::Deferred, 0);
        }

        let snapshot = match self.fetcher.fetch(&id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if e.is_malformed() {
                    Metrics::malformed("clearinghouse_state");
                }
                warn!(trader = %id, error = %e, "State fetch failed, retrying next cycle");
                return (id, EntityOutcome::Failed, 0);
            }
        };

        let previous = self.store.latest_snapshot(&id);
        let events = diff_positions(previous.as_ref(), &snapshot);
        let now = self.clock.now();

        if let Err(e) = self.store.commit_refresh(snapshot, events.clone(), now) {
            warn!(trader = %id, error = %e, "Failed to persist refresh");
            return (id, EntityOutcome::PersistFailed, 0);
        }

        let mut publish_failures = 0;
        for event in &events {
            Metrics::change_event(event.kind.as_str());
            debug!(
                trader = %id,
                kind = %event.kind,
                instrument = %event.instrument,
                before = %event.before_size,
                after = %event.after_size,
                "Position change"
            );
            if let Err(e) = self.publisher.publish(event) {
                publish_failures += 1;
                Metrics::publish_failed();
                warn!(trader = %id, event_id = %event.id, error = %e, "Failed to publish event");
            }
        }

        (
            id,
            EntityOutcome::Refreshed {
                events: events.len(),
            },
            publish_failures,
        )
    }

    /// Run cycles on the configured cadence until cancelled.
    ///
    /// An in-flight cycle finishes before the loop observes cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            batch_size = self.config.batch_size,
            interval_secs = self.config.interval.as_secs(),
            fetch_weight = self.config.fetch_weight,
            "Tracking scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Tracking scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }
}
