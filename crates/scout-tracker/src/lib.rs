//! Discovery-and-tracking pipeline.
//!
//! - [`discovery`]: registers traders seen on the trades stream
//! - [`budget`]: rolling-window request weight accounting
//! - [`scheduler`]: budgeted batch refresh of the stalest traders
//! - [`diff`]: snapshot pair to typed change events
//! - [`aggregator`]: event history to ranking metrics
//! - [`publisher`]: downstream delivery of change events

pub mod aggregator;
pub mod budget;
pub mod clock;
pub mod diff;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod publisher;
pub mod scheduler;

pub use aggregator::{compute_metric, score_metrics, AggregatorConfig, MetricAggregator};
pub use budget::{BudgetConfig, RateBudget};
pub use clock::{Clock, SystemClock};
pub use diff::diff_positions;
pub use discovery::{DiscoveryConfig, DiscoveryService};
pub use error::{TrackerError, TrackerResult};
pub use fetcher::{BoxFuture, StateFetcher};
pub use publisher::{BroadcastPublisher, EventPublisher, MemoryPublisher, NoopPublisher};
pub use scheduler::{BatchScheduler, CycleReport, EntityOutcome, SchedulerConfig};
