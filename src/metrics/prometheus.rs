//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by deckflow and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all deckflow metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total tasks reaching a terminal state, labeled by status.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of tasks per queue status.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Phase execution duration in seconds, labeled by phase.
pub static PHASE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Worker callbacks received, labeled by outcome.
pub static CALLBACKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total stuck tasks corrected by the health monitor.
pub static STUCK_RESETS_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. It creates all
/// metric instances with appropriate labels and buckets, and registers them
/// with the global Prometheus registry.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    // Create the registry
    let registry = Registry::new();

    // Task metrics
    let tasks_total = CounterVec::new(
        Opts::new(
            "deckflow_tasks_total",
            "Total tasks reaching a terminal state",
        ),
        &["status"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("deckflow_queue_depth", "Number of tasks per queue status"),
        &["status"],
    )?;

    // Pipeline metrics
    let phase_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "deckflow_phase_duration_seconds",
            "Phase execution duration in seconds",
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["phase"],
    )?;

    let callbacks_total = CounterVec::new(
        Opts::new("deckflow_callbacks_total", "Worker callbacks received"),
        &["outcome"],
    )?;

    // Monitor metrics
    let stuck_resets_total = Counter::new(
        "deckflow_stuck_resets_total",
        "Total stuck tasks corrected by the health monitor",
    )?;

    // Register all metrics with the registry
    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(phase_duration.clone()))?;
    registry.register(Box::new(callbacks_total.clone()))?;
    registry.register(Box::new(stuck_resets_total.clone()))?;

    // Store metrics in static variables
    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = PHASE_DURATION.set(phase_duration);
    let _ = CALLBACKS_TOTAL.set(callbacks_total);
    let _ = STUCK_RESETS_TOTAL.set(stuck_resets_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// This function gathers all metrics from the registry and encodes them in the
/// Prometheus text exposition format, suitable for scraping by a Prometheus server.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// HTTP handler for the /metrics endpoint.
pub async fn metrics_handler() -> String {
    export_metrics()
}

/// Records a task reaching a terminal state.
///
/// No-op until `init_metrics` has run.
pub fn record_task_terminal(status: &str) {
    if let Some(counter) = TASKS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Sets the queue-depth gauge for one status.
pub fn set_queue_depth(status: &str, count: i64) {
    if let Some(gauge) = QUEUE_DEPTH.get() {
        gauge.with_label_values(&[status]).set(count as f64);
    }
}

/// Observes one phase execution duration.
pub fn observe_phase_duration(phase: &str, seconds: f64) {
    if let Some(histogram) = PHASE_DURATION.get() {
        histogram.with_label_values(&[phase]).observe(seconds);
    }
}

/// Records a worker callback, labeled `delivered` or `stray`.
pub fn record_callback(outcome: &str) {
    if let Some(counter) = CALLBACKS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Adds corrected stuck tasks to the monitor counter.
pub fn add_stuck_resets(count: u64) {
    if let Some(counter) = STUCK_RESETS_TOTAL.get() {
        counter.inc_by(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // Note: This test modifies global state, so it must be run in isolation
        // or with special handling in a test harness.
        let result = init_metrics();
        // First call should succeed or metrics already initialized
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_helpers_are_noops_or_record() {
        // Whether or not metrics were initialized by another test, the
        // helpers must never panic.
        record_task_terminal("completed");
        set_queue_depth("pending", 4);
        observe_phase_duration("visual_analysis", 12.5);
        record_callback("delivered");
        add_stuck_resets(2);
    }

    #[test]
    fn test_metrics_after_init() {
        // Ensure metrics are initialized
        let _ = init_metrics();

        // Verify metrics can be exported
        let metrics = export_metrics();
        assert!(!metrics.is_empty());

        // If initialization succeeded, we should see metric names
        if REGISTRY.get().is_some() {
            assert!(!metrics.starts_with("# Error"));
        }
    }
}
