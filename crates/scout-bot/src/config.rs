//! Application configuration.

use crate::error::{AppError, AppResult};
use scout_store::StoreConfig;
use scout_tracker::{AggregatorConfig, BudgetConfig, DiscoveryConfig, SchedulerConfig};
use scout_ws::{BackoffPolicy, ConnectionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SCOUT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

fn default_ws_url() -> String {
    "wss://api.hyperliquid.xyz/ws".to_string()
}

fn default_info_url() -> String {
    scout_info::DEFAULT_INFO_URL.to_string()
}

fn default_instruments() -> Vec<String> {
    ["BTC", "ETH", "SOL", "AVAX", "ARB", "OP", "MATIC"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Discovery stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Planned restart cadence (seconds), independent of error reconnects.
    pub restart_interval_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Consecutive failed connects before the run is reported fatal.
    pub max_retries: u32,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            restart_interval_secs: 3600,
            backoff_base_ms: 2_000,
            backoff_max_ms: 60_000,
            max_retries: 5,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            channel_capacity: 1024,
        }
    }
}

/// Batch tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSection {
    pub batch_size: usize,
    pub interval_secs: u64,
    /// Request weight of one state fetch.
    pub fetch_weight: u32,
    /// Concurrent fetches within a batch.
    pub concurrency: usize,
    pub request_timeout_secs: u64,
}

impl Default for TrackingSection {
    fn default() -> Self {
        Self {
            batch_size: 50,
            interval_secs: 75,
            fetch_weight: 20,
            concurrency: 8,
            request_timeout_secs: 10,
        }
    }
}

/// Rate ceiling of the state endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub ceiling: u32,
    pub window_secs: u64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            ceiling: 1200,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSection {
    pub interval_secs: u64,
}

impl Default for AggregationSection {
    fn default() -> Self {
        Self { interval_secs: 600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    /// Journal directory. Unset keeps state in memory only.
    pub data_dir: Option<PathBuf>,
    pub snapshot_retention: Option<usize>,
    /// Journal checkpoint cadence while running. The journal is also
    /// checkpointed on every start.
    pub compact_interval_secs: u64,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            data_dir: None,
            snapshot_retention: None,
            compact_interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSection {
    /// Buffered events per slow subscriber.
    pub channel_capacity: usize,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            channel_capacity: 4096,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_info_url")]
    pub info_url: String,
    /// Instruments whose trade streams feed discovery.
    #[serde(default = "default_instruments")]
    pub instruments: Vec<String>,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub tracking: TrackingSection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub aggregation: AggregationSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
    #[serde(default)]
    pub publisher: PublisherSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            info_url: default_info_url(),
            instruments: default_instruments(),
            discovery: DiscoverySection::default(),
            tracking: TrackingSection::default(),
            budget: BudgetSection::default(),
            aggregation: AggregationSection::default(),
            persistence: PersistenceSection::default(),
            publisher: PublisherSection::default(),
        }
    }
}

impl AppConfig {
    /// Resolve the config path: explicit argument, then `SCOUT_CONFIG`, then
    /// the default location.
    pub fn resolve_path(cli: Option<String>) -> String {
        cli.or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load from a file, falling back to defaults when it does not exist.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject unusable settings; warn when the steady-state request rate
    /// leaves less than a third of the ceiling as headroom.
    pub fn validate(&self) -> AppResult<()> {
        if self.instruments.is_empty() {
            return Err(AppError::Config("instruments must not be empty".into()));
        }
        if self.discovery.backoff_base_ms == 0 {
            return Err(AppError::Config("discovery.backoff_base_ms must be > 0".into()));
        }
        if self.discovery.backoff_base_ms > self.discovery.backoff_max_ms {
            return Err(AppError::Config(format!(
                "discovery.backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.discovery.backoff_base_ms, self.discovery.backoff_max_ms
            )));
        }
        if self.budget.ceiling == 0 || self.budget.window_secs == 0 {
            return Err(AppError::Config("budget ceiling and window must be > 0".into()));
        }
        if self.aggregation.interval_secs == 0 {
            return Err(AppError::Config("aggregation.interval_secs must be > 0".into()));
        }
        if self.persistence.compact_interval_secs == 0 {
            return Err(AppError::Config(
                "persistence.compact_interval_secs must be > 0".into(),
            ));
        }

        let budget = self.budget_config();
        let scheduler = self.scheduler_config();
        scheduler
            .validate(&budget)
            .map_err(|e| AppError::Config(e.to_string()))?;

        let per_window =
            budget.steady_state_per_window(scheduler.batch_weight(), scheduler.interval);
        if !budget.is_comfortable(scheduler.batch_weight(), scheduler.interval) {
            warn!(
                per_window,
                ceiling = budget.ceiling,
                "Steady-state request weight exceeds two thirds of the rate ceiling"
            );
        }
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            instruments: self.instruments.clone(),
            backoff: BackoffPolicy {
                base_delay_ms: self.discovery.backoff_base_ms,
                max_delay_ms: self.discovery.backoff_max_ms,
                max_retries: self.discovery.max_retries,
                ..BackoffPolicy::default()
            },
            heartbeat_interval_ms: self.discovery.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.discovery.heartbeat_timeout_ms,
            ..ConnectionConfig::default()
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            connection: self.connection_config(),
            channel_capacity: self.discovery.channel_capacity,
            restart_interval: Duration::from_secs(self.discovery.restart_interval_secs),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.tracking.batch_size,
            interval: Duration::from_secs(self.tracking.interval_secs),
            fetch_weight: self.tracking.fetch_weight,
            concurrency: self.tracking.concurrency,
        }
    }

    pub fn budget_config(&self) -> BudgetConfig {
        BudgetConfig {
            ceiling: self.budget.ceiling,
            window: Duration::from_secs(self.budget.window_secs),
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            interval: Duration::from_secs(self.aggregation.interval_secs),
        }
    }

    pub fn compact_interval(&self) -> Duration {
        Duration::from_secs(self.persistence.compact_interval_secs)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: self.persistence.data_dir.clone(),
            snapshot_retention: self.persistence.snapshot_retention,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.tracking.request_timeout_secs)
    }
}
