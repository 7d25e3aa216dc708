//! Prometheus metrics and structured logging for the trader scout.
//!
//! - Prometheus metrics for the stream, scheduler, budget and aggregator
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
