//! Metrics module for Prometheus-based monitoring.
//!
//! This module provides metrics collection and export for queue and
//! pipeline operations: terminal task counts, queue depth, phase
//! durations, dispatch and callback outcomes, and stuck-task repairs.
//!
//! # Example
//!
//! ```ignore
//! use deckflow::metrics::{init_metrics, export_metrics};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! // Export metrics for Prometheus scraping
//! let metrics_text = export_metrics();
//! ```

pub mod prometheus;

// Re-export key functions for convenient access
pub use prometheus::{
    add_stuck_resets, export_metrics, init_metrics, metrics_handler, observe_phase_duration,
    record_callback, record_task_terminal, set_queue_depth,
};

// Re-export metric constants for direct access when needed
pub use prometheus::{
    CALLBACKS_TOTAL, PHASE_DURATION, QUEUE_DEPTH, REGISTRY, STUCK_RESETS_TOTAL, TASKS_TOTAL,
};
