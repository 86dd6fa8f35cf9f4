//! Command-line interface for deckflow.
//!
//! Provides commands for running the orchestrator, enqueueing documents,
//! querying status, and queue administration.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
