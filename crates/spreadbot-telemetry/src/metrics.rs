//! Prometheus metrics for spreadbot.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a startup bug that should crash early.
//! These panics only occur during static initialization.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_int_gauge, CounterVec, Encoder, Histogram,
    IntGauge, TextEncoder,
};

/// Candidates by outcome (`skipped`, `filled`, `failed`, `panicked`).
pub static CANDIDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "spreadbot_candidates_total",
        "Order candidates processed, by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Orders submitted, by kind (`entry`, `plan`, `close`, `pyramid`) and result.
pub static ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "spreadbot_orders_total",
        "Orders submitted, by kind and result",
        &["kind", "result"]
    )
    .unwrap()
});

/// Positions closed by the monitor, by reason.
pub static POSITIONS_CLOSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "spreadbot_positions_closed_total",
        "Positions closed by the monitor, by reason",
        &["reason"]
    )
    .unwrap()
});

/// Time spent waiting for an admission slot, in milliseconds.
pub static ADMISSION_WAIT_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "spreadbot_admission_wait_ms",
        "Time spent waiting for a rate-limit slot in milliseconds",
        vec![0.0, 1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
    )
    .unwrap()
});

/// Open positions seen in the last monitor cycle.
pub static OPEN_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "spreadbot_open_positions",
        "Open positions seen in the last monitor cycle"
    )
    .unwrap()
});

/// Feed reconnects, by reason.
pub static FEED_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "spreadbot_feed_reconnect_total",
        "Signal feed reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn candidate(outcome: &str) {
        CANDIDATES_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn order(kind: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        ORDERS_TOTAL.with_label_values(&[kind, result]).inc();
    }

    pub fn position_closed(reason: &str) {
        POSITIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn admission_wait(wait_ms: f64) {
        ADMISSION_WAIT_MS.observe(wait_ms);
    }

    pub fn open_positions(count: i64) {
        OPEN_POSITIONS.set(count);
    }

    pub fn feed_reconnect(reason: &str) {
        FEED_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Render every registered metric in the text exposition format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_metrics() {
        Metrics::candidate("skipped");
        Metrics::order("entry", true);
        Metrics::position_closed("stop_loss");
        Metrics::admission_wait(3.0);

        let text = Metrics::render().unwrap();
        assert!(text.contains("spreadbot_candidates_total"));
        assert!(text.contains("spreadbot_orders_total"));
        assert!(text.contains("reason=\"stop_loss\""));
        assert!(text.contains("spreadbot_admission_wait_ms"));
    }
}
