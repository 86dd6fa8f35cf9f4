//! Per-task pipeline execution.
//!
//! The runner takes one claimed task and drives it through the four
//! phases in order, persisting each phase payload before the next phase
//! is entered. A retry attempt first clears the document's cached phase
//! results - intermediate artifacts are keyed by document, not by
//! attempt, so resuming mid-pipeline would mix stale and fresh data.
//!
//! The claim transaction has already committed when the runner starts;
//! no store transaction is held across any network call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::metrics;
use crate::store::progress::step_status;
use crate::store::{Store, StoreError, Task, WorkerServer};

use super::callbacks::CallbackRouter;
use super::dispatcher::{DispatchError, PhaseOutcome, WorkerDispatcher};
use super::phase::Phase;

/// Errors that can occur while running a task's pipeline.
#[derive(Debug, Error)]
pub enum RunError {
    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The worker was unreachable before any phase ran; the task should go
    /// straight back to `pending`.
    #[error("Worker unreachable before dispatch: {message}")]
    Unreachable {
        /// Transport error detail.
        message: String,
    },

    /// Transient infrastructure failure mid-pipeline; the task should be
    /// released for a delayed retry.
    #[error("Transient failure during {phase}: {message}")]
    Transient {
        /// Phase that was executing.
        phase: Phase,
        /// Failure detail.
        message: String,
    },

    /// The worker reported a phase failure; the task is terminally failed.
    #[error("Phase {phase} failed: {message}")]
    Phase {
        /// Failing phase.
        phase: Phase,
        /// Error payload from the worker.
        message: String,
    },
}

/// Drives claimed tasks through the phase pipeline.
pub struct PipelineRunner {
    store: Store,
    dispatcher: Arc<WorkerDispatcher>,
    callbacks: Arc<CallbackRouter>,
    phase_timeout: Duration,
}

impl PipelineRunner {
    /// Creates a pipeline runner.
    pub fn new(
        store: Store,
        dispatcher: Arc<WorkerDispatcher>,
        callbacks: Arc<CallbackRouter>,
        phase_timeout: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            callbacks,
            phase_timeout,
        }
    }

    /// Runs every phase of a claimed task on the given worker.
    ///
    /// On success all four phase payloads are persisted and the caller
    /// records the terminal `completed` outcome. Phase failures abort the
    /// remaining phases; transient failures surface so the scheduler can
    /// release the task for retry.
    pub async fn run(&self, task: &Task, worker: &WorkerServer) -> Result<(), RunError> {
        let progress = self.store.progress();
        let results = self.store.results();

        // Retry means redo from phase 1: drop every cached payload first.
        if task.retry_count > 0 {
            let cleared = results.clear_document(task.document_id).await?;
            if cleared > 0 {
                info!(
                    task_id = %task.id,
                    document_id = %task.document_id,
                    cleared = cleared,
                    "cleared cached phase results before retry"
                );
            }
        }

        for phase in Phase::ALL {
            let started = Instant::now();
            let (span_start, _) = phase.progress_span();

            progress
                .record(
                    task.id,
                    phase.step_name(),
                    step_status::RUNNING,
                    span_start,
                    &format!("dispatching {} to {}", phase, worker.server_id),
                )
                .await?;

            // Register the rendezvous before dispatching so a fast worker
            // callback cannot arrive with nothing listening.
            let callback_rx = self.callbacks.register(task.id, phase);

            let outcome = match self.dispatcher.dispatch_phase(worker, task, phase).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.callbacks.deregister(task.id, phase);
                    let run_err = classify_dispatch(phase, e);
                    if let RunError::Phase { phase, message } = &run_err {
                        self.record_phase_failure(task, *phase, message).await;
                    }
                    return Err(run_err);
                }
            };

            let payload = match outcome {
                PhaseOutcome::Completed(value) => {
                    self.callbacks.deregister(task.id, phase);
                    value
                }
                PhaseOutcome::Accepted => {
                    match tokio::time::timeout(self.phase_timeout, callback_rx).await {
                        Err(_elapsed) => {
                            self.callbacks.deregister(task.id, phase);
                            return Err(RunError::Transient {
                                phase,
                                message: format!(
                                    "no worker callback within {:?}",
                                    self.phase_timeout
                                ),
                            });
                        }
                        Ok(Err(_closed)) => {
                            return Err(RunError::Transient {
                                phase,
                                message: "callback channel closed before delivery".to_string(),
                            });
                        }
                        Ok(Ok(Ok(value))) => value,
                        Ok(Ok(Err(worker_error))) => {
                            self.record_phase_failure(task, phase, &worker_error).await;
                            return Err(RunError::Phase {
                                phase,
                                message: worker_error,
                            });
                        }
                    }
                }
            };

            results
                .store_phase(task.document_id, phase.step_name(), &payload)
                .await?;

            metrics::observe_phase_duration(phase.step_name(), started.elapsed().as_secs_f64());

            info!(
                task_id = %task.id,
                phase = %phase,
                duration_ms = started.elapsed().as_millis(),
                "phase completed"
            );
        }

        Ok(())
    }

    /// Records a `failed` progress event for the aborting phase.
    ///
    /// Best effort: a store error here must not mask the phase failure
    /// being propagated.
    async fn record_phase_failure(&self, task: &Task, phase: Phase, message: &str) {
        let (span_start, _) = phase.progress_span();
        if let Err(e) = self
            .store
            .progress()
            .record(task.id, phase.step_name(), step_status::FAILED, span_start, message)
            .await
        {
            warn!(task_id = %task.id, phase = %phase, error = %e, "failed to record phase failure event");
        }
    }
}

/// Maps a dispatch error onto the runner's error taxonomy.
///
/// A transport failure on the first phase means nothing was started yet,
/// so the task can go straight back to `pending`; later transport
/// failures and 5xx answers become delayed retries. Explicit phase
/// failures, 4xx answers, and malformed bodies are fatal.
fn classify_dispatch(phase: Phase, error: DispatchError) -> RunError {
    match error {
        DispatchError::PhaseFailed { phase, message } => RunError::Phase { phase, message },
        DispatchError::InvalidResponse(message) => RunError::Phase {
            phase,
            message: format!("invalid worker response: {}", message),
        },
        DispatchError::Api { code, message } if code < 500 => RunError::Phase {
            phase,
            message: format!("worker rejected dispatch ({}): {}", code, message),
        },
        DispatchError::Unreachable(message) if phase == Phase::VisualAnalysis => {
            RunError::Unreachable { message }
        }
        other => RunError::Transient {
            phase,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_phase_failure_is_fatal() {
        let err = classify_dispatch(
            Phase::DataExtraction,
            DispatchError::PhaseFailed {
                phase: Phase::DataExtraction,
                message: "no fields found".to_string(),
            },
        );

        assert!(matches!(
            err,
            RunError::Phase {
                phase: Phase::DataExtraction,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_unreachable_first_phase_goes_to_pending() {
        let err = classify_dispatch(
            Phase::VisualAnalysis,
            DispatchError::Unreachable("connection refused".to_string()),
        );

        assert!(matches!(err, RunError::Unreachable { .. }));
    }

    #[test]
    fn test_classify_unreachable_later_phase_is_transient() {
        let err = classify_dispatch(
            Phase::TemplateProcessing,
            DispatchError::Unreachable("connection reset".to_string()),
        );

        assert!(matches!(
            err,
            RunError::Transient {
                phase: Phase::TemplateProcessing,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_server_error_is_transient() {
        let err = classify_dispatch(
            Phase::VisualAnalysis,
            DispatchError::Api {
                code: 503,
                message: "overloaded".to_string(),
            },
        );

        assert!(matches!(err, RunError::Transient { .. }));
    }

    #[test]
    fn test_classify_client_error_is_fatal() {
        let err = classify_dispatch(
            Phase::VisualAnalysis,
            DispatchError::Api {
                code: 422,
                message: "unknown phase".to_string(),
            },
        );

        assert!(matches!(err, RunError::Phase { .. }));
    }

    #[test]
    fn test_classify_timeout_is_transient() {
        let err = classify_dispatch(
            Phase::VisualAnalysis,
            DispatchError::Timeout(Duration::from_secs(30)),
        );

        assert!(matches!(err, RunError::Transient { .. }));
    }

    #[test]
    fn test_classify_invalid_response_is_fatal() {
        let err = classify_dispatch(
            Phase::SpecializedAnalysis,
            DispatchError::InvalidResponse("not json".to_string()),
        );

        assert!(matches!(err, RunError::Phase { .. }));
    }
}
