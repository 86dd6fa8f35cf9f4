//! Pipeline execution: the four-phase state machine and worker dispatch.
//!
//! This module drives one claimed task through the fixed phase sequence on
//! a remote GPU worker:
//!
//! - **Phase**: the ordered phase set and its explicit state machine
//! - **Dispatcher**: the HTTP call that hands a phase to a worker
//! - **Callbacks**: the rendezvous between dispatched phases and the
//!   worker's asynchronous result posts
//! - **Runner**: the per-task loop that sequences phases, persists phase
//!   payloads, and records progress
//!
//! # Pipeline Flow
//!
//! 1. **Cache clearing**: a retry attempt first drops every cached phase
//!    payload for the document - retry means redo from phase 1
//! 2. **Dispatch**: each phase is POSTed to the worker with the file path
//!    and a callback URL
//! 3. **Result**: the worker answers inline (200) or later via the
//!    callback endpoint (202); either way the wait is bounded by the
//!    phase timeout
//! 4. **Persist**: the phase payload is stored before the next phase is
//!    entered; a phase failure aborts the remainder

pub mod callbacks;
pub mod dispatcher;
pub mod phase;
pub mod runner;

// Re-export main types for convenience
pub use callbacks::{CallbackRouter, PhasePayload};
pub use dispatcher::{DispatchError, PhaseOutcome, PhaseRequest, WorkerDispatcher};
pub use phase::{Phase, PipelineState};
pub use runner::{PipelineRunner, RunError};
