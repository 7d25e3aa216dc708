//! Main application orchestration.
//!
//! Runs three independent long-lived tasks:
//! - Discovery: trades stream to new traders, restarted on a fixed cadence
//! - Tracking: budgeted batch refresh, diff, commit, publish
//! - Aggregation: ranking metrics on a coarse cadence
//!
//! With a journal directory configured, a fourth task checkpoints the journal
//! periodically. Ctrl-C (or [`Application::shutdown`]) cancels them all.

use crate::config::AppConfig;
use crate::error::AppResult;
use scout_info::InfoClient;
use scout_store::MemoryStore;
use scout_tracker::{
    BatchScheduler, BroadcastPublisher, DiscoveryService, MetricAggregator, RateBudget,
    StateFetcher, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    store: Arc<MemoryStore>,
    budget: Arc<RateBudget>,
    publisher: Arc<BroadcastPublisher>,
    discovery: Arc<DiscoveryService>,
    scheduler: Arc<BatchScheduler>,
    aggregator: Arc<MetricAggregator>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application against the live info endpoint.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let fetcher = InfoClient::with_timeout(&config.info_url, config.request_timeout())?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Build the application with a custom state source.
    pub fn with_fetcher(config: AppConfig, fetcher: Arc<dyn StateFetcher>) -> AppResult<Self> {
        config.validate()?;

        let store = Arc::new(MemoryStore::open(config.store_config())?);
        let clock = Arc::new(SystemClock);
        let budget = Arc::new(RateBudget::new(config.budget_config()));
        let publisher = Arc::new(BroadcastPublisher::new(config.publisher.channel_capacity));

        let discovery = Arc::new(DiscoveryService::new(
            config.discovery_config(),
            store.clone(),
            clock.clone(),
        ));
        let scheduler = Arc::new(BatchScheduler::new(
            config.scheduler_config(),
            store.clone(),
            fetcher,
            budget.clone(),
            publisher.clone(),
            clock.clone(),
        ));
        let aggregator = Arc::new(MetricAggregator::new(
            config.aggregator_config(),
            store.clone(),
            clock,
        ));

        info!(
            traders = store.len(),
            instruments = ?config.instruments,
            batch_size = config.tracking.batch_size,
            ceiling = config.budget.ceiling,
            "Application initialized"
        );

        Ok(Self {
            config,
            store,
            budget,
            publisher,
            discovery,
            scheduler,
            aggregator,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    pub fn budget(&self) -> Arc<RateBudget> {
        self.budget.clone()
    }

    pub fn scheduler(&self) -> Arc<BatchScheduler> {
        self.scheduler.clone()
    }

    pub fn aggregator(&self) -> Arc<MetricAggregator> {
        self.aggregator.clone()
    }

    /// JSON change events as they are published.
    pub fn subscribe_events(&self) -> broadcast::Receiver<String> {
        self.publisher.subscribe()
    }

    /// Stop all tasks. `run` returns once they have wound down.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until Ctrl-C or [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> AppResult<()> {
        let cancel = self.shutdown.clone();

        let discovery = tokio::spawn(supervise_discovery(
            self.discovery.clone(),
            self.config.discovery_config().restart_interval,
            cancel.clone(),
        ));
        let scheduler = tokio::spawn({
            let scheduler = self.scheduler.clone();
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });
        let aggregator = tokio::spawn({
            let aggregator = self.aggregator.clone();
            let cancel = cancel.clone();
            async move { aggregator.run(cancel).await }
        });
        let compaction = self.config.persistence.data_dir.is_some().then(|| {
            tokio::spawn(compact_periodically(
                self.store.clone(),
                self.config.compact_interval(),
                cancel.clone(),
            ))
        });

        info!("Application running");

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
            }
            () = cancel.cancelled() => {
                info!("Shutdown requested");
            }
        }
        cancel.cancel();

        for (task, handle) in [
            ("discovery", discovery),
            ("scheduler", scheduler),
            ("aggregator", aggregator),
        ] {
            if let Err(e) = handle.await {
                error!(task, error = %e, "Task ended abnormally");
            }
        }
        if let Some(handle) = compaction {
            if let Err(e) = handle.await {
                error!(task = "compaction", error = %e, "Task ended abnormally");
            }
        }

        info!(
            traders = self.store.len(),
            budget_used = self.budget.consumed(),
            "Shutdown complete"
        );
        Ok(())
    }
}

/// Checkpoint the store's journal every `interval` until cancelled.
///
/// The first checkpoint happens one `interval` after start; opening the
/// store already compacted the journal.
pub async fn compact_periodically(
    store: Arc<MemoryStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let store = store.clone();
                match tokio::task::spawn_blocking(move || store.compact()).await {
                    Ok(Ok(lines)) => debug!(lines, "Journal compacted"),
                    Ok(Err(e)) => warn!(error = %e, "Journal compaction failed"),
                    Err(e) => error!(error = %e, "Journal compaction panicked"),
                }
            }
        }
    }

    info!("Journal compaction stopped");
}

/// Keep discovery running, starting a fresh run every `restart_interval`.
///
/// A run that fails fatally is not retried before the next scheduled restart.
pub async fn supervise_discovery(
    discovery: Arc<DiscoveryService>,
    restart_interval: Duration,
    cancel: CancellationToken,
) {
    let mut generation: u64 = 0;

    while !cancel.is_cancelled() {
        generation += 1;
        let child = cancel.child_token();
        let run = discovery.run(child.clone());
        tokio::pin!(run);
        let deadline = tokio::time::sleep(restart_interval);
        tokio::pin!(deadline);

        info!(generation, "Starting discovery run");

        let ended = tokio::select! {
            res = &mut run => Some(res),
            () = &mut deadline => None,
        };
        let result = match ended {
            Some(res) => res,
            None => {
                info!(generation, "Scheduled discovery restart");
                child.cancel();
                run.await
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        if let Err(e) = result {
            error!(
                generation,
                error = %e,
                "Discovery run failed, waiting for next scheduled restart"
            );
            tokio::select! {
                () = &mut deadline => {}
                () = cancel.cancelled() => break,
            }
        } else if !deadline.is_elapsed() {
            warn!(generation, "Discovery run ended early, waiting for next scheduled restart");
            tokio::select! {
                () = &mut deadline => {}
                () = cancel.cancelled() => break,
            }
        }
    }

    info!("Discovery supervisor stopped");
}
