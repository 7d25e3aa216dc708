//! Prometheus metrics for the trader scout.
//!
//! Covers:
//! - Discovery stream state and reconnects
//! - Trader registration and malformed input
//! - Scheduler batch outcomes and budget consumption
//! - Change events and publish failures
//! - Aggregation cycles
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a startup-fatal programming error. These
//! panics only occur during static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge, CounterVec, Encoder, GaugeVec, Histogram,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Stream connection states, in lifecycle order.
const WS_STATES: [&str; 5] = [
    "disconnected",
    "connecting",
    "subscribed",
    "streaming",
    "reconnecting",
];

/// Discovery stream state machine current state.
/// Labels: state (disconnected/connecting/subscribed/streaming/reconnecting)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "scout_ws_state",
        "Discovery stream state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total stream reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "scout_ws_reconnect_total",
        "Total discovery stream reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Messages or trade entries that failed validation.
pub static MALFORMED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "scout_malformed_total",
        "Inbound payloads skipped because they failed validation",
        &["source"]
    )
    .unwrap()
});

/// Newly registered traders.
pub static TRADERS_DISCOVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "scout_traders_discovered_total",
        "Traders registered by the discovery stream"
    )
    .unwrap()
});

/// Active traders in the rotation.
pub static TRACKED_TRADERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("scout_tracked_traders", "Active traders in the refresh rotation")
        .unwrap()
});

/// Per-entity batch outcomes.
/// Labels: outcome (refreshed/failed/deferred/persist_failed)
pub static BATCH_OUTCOME_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "scout_batch_outcome_total",
        "Per-trader outcomes of scheduler batches",
        &["outcome"]
    )
    .unwrap()
});

/// Batch cycles skipped because the previous cycle was still running.
pub static BATCH_SKIPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "scout_batch_skipped_total",
        "Scheduler cycles skipped due to an overlapping run"
    )
    .unwrap()
});

/// Rate weight consumed in the current window.
pub static BUDGET_CONSUMED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "scout_budget_consumed",
        "Request weight consumed in the current rate window"
    )
    .unwrap()
});

/// Emitted change events.
/// Labels: kind (opened/closed/increased/decreased/flipped)
pub static CHANGE_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "scout_change_events_total",
        "Position change events emitted",
        &["kind"]
    )
    .unwrap()
});

/// Events the publisher failed to deliver.
pub static PUBLISH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "scout_publish_failures_total",
        "Change events that could not be delivered downstream"
    )
    .unwrap()
});

/// Aggregation cycle duration in seconds.
pub static AGGREGATION_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "scout_aggregation_duration_seconds",
        "Duration of a full metric aggregation cycle",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set the stream state. Only the active state is 1.
    pub fn ws_state_set(state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a skipped payload. `source` is e.g. `ws_message`, `trade`, `state`.
    pub fn malformed(source: &str) {
        MALFORMED_TOTAL.with_label_values(&[source]).inc();
    }

    pub fn malformed_n(source: &str, count: u64) {
        if count > 0 {
            MALFORMED_TOTAL.with_label_values(&[source]).inc_by(count);
        }
    }

    pub fn traders_discovered(count: u64) {
        TRADERS_DISCOVERED_TOTAL.inc_by(count);
    }

    pub fn tracked_traders(count: usize) {
        TRACKED_TRADERS.set(count as i64);
    }

    pub fn batch_outcome(outcome: &str, count: u64) {
        if count > 0 {
            BATCH_OUTCOME_TOTAL.with_label_values(&[outcome]).inc_by(count);
        }
    }

    pub fn batch_skipped() {
        BATCH_SKIPPED_TOTAL.inc();
    }

    pub fn budget_consumed(weight: u32) {
        BUDGET_CONSUMED.set(i64::from(weight));
    }

    pub fn change_event(kind: &str) {
        CHANGE_EVENTS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn publish_failed() {
        PUBLISH_FAILURES_TOTAL.inc();
    }

    pub fn aggregation_duration(seconds: f64) {
        AGGREGATION_DURATION_SECONDS.observe(seconds);
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn gather() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_state_single_active() {
        Metrics::ws_state_set("connecting");
        Metrics::ws_state_set("streaming");

        assert_eq!(WS_STATE.with_label_values(&["streaming"]).get(), 1.0);
        assert_eq!(WS_STATE.with_label_values(&["connecting"]).get(), 0.0);
    }

    #[test]
    fn test_gather_contains_registered_metrics() {
        Metrics::change_event("opened");
        Metrics::batch_outcome("refreshed", 3);

        let text = Metrics::gather().unwrap();
        assert!(text.contains("scout_change_events_total"));
        assert!(text.contains("scout_batch_outcome_total"));
    }
}
