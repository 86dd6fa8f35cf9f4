//! Queue processor: polls the task store and drives claimed work.
//!
//! Any number of processor instances may run against one shared store;
//! correctness rests entirely on the store's atomic claim (a single
//! conditional UPDATE), not on in-process locking.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │   Task Store     │
//!                 │   (PostgreSQL)   │
//!                 └───────┬──────────┘
//!                  atomic │ claim
//!          ┌──────────────┼──────────────┐
//!          │              │              │
//!          ▼              ▼              ▼
//!    ┌──────────┐   ┌──────────┐   ┌──────────┐
//!    │Processor1│   │Processor2│   │ProcessorN│
//!    └────┬─────┘   └────┬─────┘   └────┬─────┘
//!         │  dispatch phases over HTTP  │
//!         └──────────────┬──────────────┘
//!                        ▼
//!                 ┌──────────────┐
//!                 │  GPU worker  │
//!                 └──────────────┘
//! ```
//!
//! # Reliability
//!
//! - **Backpressure**: no claim is attempted while the worker pool is at
//!   capacity or all local slots are busy
//! - **Rollback**: a task whose dispatch failed is returned to `pending`
//!   instead of rotting in `processing`
//! - **Bounded retries**: transient failures are requeued with jittered
//!   exponential backoff until the retry budget is spent
//! - **Graceful shutdown**: in-flight tasks finish before the loop exits

pub mod backoff;
pub mod processor;

// Re-export main types for convenience
pub use backoff::retry_delay;
pub use processor::{QueueProcessor, SchedulerStats};
