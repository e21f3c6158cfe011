//! Prometheus metrics for the auto-sniping engine.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration
//! fails, it indicates a fatal configuration error (e.g., duplicate metric
//! names) that should crash at startup rather than fail silently. These
//! panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_int_counter,
    register_int_gauge, CounterVec, Gauge, Histogram, IntCounter, IntGauge,
};

/// Total successfully executed trades.
pub static TRADES_EXECUTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "snipe_trades_executed_total",
        "Total confirmed-successful trade executions"
    )
    .unwrap()
});

/// Total failed executions by class.
pub static EXECUTIONS_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snipe_executions_failed_total",
        "Total failed trade executions by error class",
        &["class"]
    )
    .unwrap()
});

/// Total patterns published as candidates.
pub static PATTERNS_DETECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snipe_patterns_detected_total",
        "Total candidate patterns by type",
        &["pattern_type"]
    )
    .unwrap()
});

/// Total safety violations recorded.
pub static SAFETY_VIOLATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snipe_safety_violations_total",
        "Total safety violations by severity",
        &["severity"]
    )
    .unwrap()
});

/// Total emergency stops.
pub static EMERGENCY_STOPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("snipe_emergency_stops_total", "Total emergency stops").unwrap()
});

/// Current composite risk score (0-100).
pub static RISK_SCORE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("snipe_risk_score", "Current composite risk score").unwrap()
});

/// Currently open positions.
pub static OPEN_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("snipe_open_positions", "Currently open positions").unwrap()
});

/// Order execution latency in milliseconds.
pub static EXECUTION_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "snipe_execution_latency_ms",
        "Order execution latency in milliseconds",
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 15000.0]
    )
    .unwrap()
});

/// Thin facade so call sites stay one-liners.
pub struct Metrics;

impl Metrics {
    pub fn trade_executed() {
        TRADES_EXECUTED_TOTAL.inc();
    }

    pub fn execution_failed(class: &str) {
        EXECUTIONS_FAILED_TOTAL.with_label_values(&[class]).inc();
    }

    pub fn pattern_detected(pattern_type: &str) {
        PATTERNS_DETECTED_TOTAL
            .with_label_values(&[pattern_type])
            .inc();
    }

    pub fn safety_violation(severity: &str) {
        SAFETY_VIOLATIONS_TOTAL.with_label_values(&[severity]).inc();
    }

    pub fn emergency_stop() {
        EMERGENCY_STOPS_TOTAL.inc();
    }

    pub fn risk_score(score: f64) {
        RISK_SCORE.set(score);
    }

    pub fn open_positions(count: usize) {
        OPEN_POSITIONS.set(count as i64);
    }

    pub fn execution_latency(latency_ms: f64) {
        EXECUTION_LATENCY_MS.observe(latency_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_accept_values() {
        // Registration happens lazily; exercising each call is enough to
        // catch duplicate-name panics.
        Metrics::trade_executed();
        Metrics::execution_failed("connectivity");
        Metrics::pattern_detected("breakout_with_volume");
        Metrics::safety_violation("warning");
        Metrics::risk_score(42.0);
        Metrics::open_positions(2);
        Metrics::execution_latency(12.5);
    }
}
