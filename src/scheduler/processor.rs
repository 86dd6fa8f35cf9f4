//! The polling queue processor.
//!
//! Each tick claims at most one task, hands it to the pipeline runner on
//! a spawned tokio task, and keeps ticking. Backpressure is checked
//! before claiming: a tick is skipped when every local slot is busy or
//! the worker registry reports no spare capacity, so no task is moved to
//! `processing` only to wait in memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::metrics;
use crate::pipeline::{PipelineRunner, RunError};
use crate::scheduler::backoff;
use crate::store::{Store, Task, TaskOutcome, WorkerServer};

/// Snapshot of processor counters.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Tasks claimed from the store.
    pub claimed: u64,
    /// Tasks that finished every phase.
    pub completed: u64,
    /// Tasks terminally failed.
    pub failed: u64,
    /// Tasks released for a delayed retry.
    pub retried: u64,
    /// Tasks returned to `pending` after a failed dispatch.
    pub released: u64,
    /// Ticks with nothing to do (no capacity or no eligible task).
    pub idle_ticks: u64,
}

/// Shared counters updated by in-flight task handlers.
#[derive(Default)]
struct SharedStats {
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    released: AtomicU64,
    idle_ticks: AtomicU64,
}

impl SharedStats {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            claimed: self.claimed.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            idle_ticks: self.idle_ticks.load(Ordering::SeqCst),
        }
    }
}

/// Polls the task store and dispatches claimed tasks.
pub struct QueueProcessor {
    store: Store,
    runner: Arc<PipelineRunner>,
    config: OrchestratorConfig,
    limiter: Arc<Semaphore>,
    stats: Arc<SharedStats>,
}

impl QueueProcessor {
    /// Creates a queue processor.
    pub fn new(store: Store, runner: Arc<PipelineRunner>, config: OrchestratorConfig) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_tasks));

        Self {
            store,
            runner,
            config,
            limiter,
            stats: Arc::new(SharedStats::default()),
        }
    }

    /// Runs the polling loop until a shutdown signal arrives.
    ///
    /// In-flight tasks keep running on their spawned handlers; the loop
    /// only stops claiming new work.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_concurrent = self.config.max_concurrent_tasks,
            "queue processor started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("queue processor received shutdown signal");
                    break;
                }
                _ = tick.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("queue processor stopped");
    }

    /// One polling tick: backpressure check, claim, dispatch.
    async fn tick(&self) {
        // Local slot first; claiming without one would park the task in
        // `processing` while it waits in memory.
        let Ok(permit) = Arc::clone(&self.limiter).try_acquire_owned() else {
            self.stats.idle_ticks.fetch_add(1, Ordering::SeqCst);
            debug!("all local slots busy, skipping tick");
            return;
        };

        // Worker capacity from the registry; unavailable workers are
        // excluded by the pick itself.
        let worker = match self
            .store
            .servers()
            .pick_available(self.config.worker_heartbeat_timeout)
            .await
        {
            Ok(Some(worker)) => worker,
            Ok(None) => {
                self.stats.idle_ticks.fetch_add(1, Ordering::SeqCst);
                debug!("no worker with spare capacity, skipping tick");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to query worker registry");
                return;
            }
        };

        let task = match self.store.tasks().claim_next().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                self.stats.idle_ticks.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Err(e) => {
                error!(error = %e, "claim failed");
                return;
            }
        };

        self.stats.claimed.fetch_add(1, Ordering::SeqCst);
        info!(
            task_id = %task.id,
            document_id = %task.document_id,
            priority = task.priority,
            retry_count = task.retry_count,
            worker = %worker.server_id,
            "claimed task"
        );

        let store = self.store.clone();
        let runner = Arc::clone(&self.runner);
        let config = self.config.clone();
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            process_task(store, runner, config, stats, task, worker, permit).await;
        });
    }

    /// Returns a snapshot of the processor counters.
    pub fn stats(&self) -> SchedulerStats {
        self.stats.snapshot()
    }
}

/// Runs one claimed task to its outcome and records the transition.
async fn process_task(
    store: Store,
    runner: Arc<PipelineRunner>,
    config: OrchestratorConfig,
    stats: Arc<SharedStats>,
    task: Task,
    worker: WorkerServer,
    _permit: OwnedSemaphorePermit,
) {
    let tasks = store.tasks();

    match runner.run(&task, &worker).await {
        Ok(()) => {
            match tasks.complete(task.id, &TaskOutcome::Completed).await {
                Ok(()) => {
                    stats.completed.fetch_add(1, Ordering::SeqCst);
                    metrics::record_task_terminal("completed");
                    info!(task_id = %task.id, document_id = %task.document_id, "task completed");
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "failed to record completion");
                }
            }
        }
        Err(RunError::Phase { phase, message }) => {
            let outcome = TaskOutcome::failed(format!("{}: {}", phase, message));
            match tasks.complete(task.id, &outcome).await {
                Ok(()) => {
                    stats.failed.fetch_add(1, Ordering::SeqCst);
                    metrics::record_task_terminal("failed");
                    warn!(
                        task_id = %task.id,
                        phase = %phase,
                        error = %message,
                        "task failed on phase error"
                    );
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "failed to record phase failure");
                }
            }
        }
        Err(RunError::Unreachable { message }) => {
            // Worker never saw the task; make it claimable on the next
            // tick unless the retry budget is already spent.
            if retries_exhausted(task.retry_count, config.max_retries) {
                fail_exhausted(&tasks, &stats, &task, &message).await;
            } else {
                match tasks.release_to_pending(task.id, &message).await {
                    Ok(()) => {
                        stats.released.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            task_id = %task.id,
                            error = %message,
                            "dispatch failed, task returned to pending"
                        );
                    }
                    Err(e) => {
                        error!(task_id = %task.id, error = %e, "failed to release task to pending");
                    }
                }
            }
        }
        Err(RunError::Transient { phase, message }) => {
            if retries_exhausted(task.retry_count, config.max_retries) {
                let detail = format!("{}: {}", phase, message);
                fail_exhausted(&tasks, &stats, &task, &detail).await;
            } else {
                let attempt = task.retry_count as u32 + 1;
                let delay = backoff::retry_delay(
                    attempt,
                    config.retry_backoff_base,
                    config.retry_backoff_cap,
                );

                match tasks.release_for_retry(task.id, &message, delay).await {
                    Ok(()) => {
                        stats.retried.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            task_id = %task.id,
                            phase = %phase,
                            attempt = attempt,
                            delay_secs = delay.as_secs(),
                            error = %message,
                            "transient failure, task released for retry"
                        );
                    }
                    Err(e) => {
                        error!(task_id = %task.id, error = %e, "failed to release task for retry");
                    }
                }
            }
        }
        Err(RunError::Store(e)) => {
            // A store failure mid-run leaves the task `processing`; try to
            // hand it back rather than waiting on the health monitor.
            error!(task_id = %task.id, error = %e, "store error during pipeline run");
            if let Err(release_err) = tasks
                .release_to_pending(task.id, &format!("store error: {}", e))
                .await
            {
                error!(
                    task_id = %task.id,
                    error = %release_err,
                    "failed to release task after store error"
                );
            }
        }
    }
}

/// Marks a task failed because its transient-retry budget is spent.
async fn fail_exhausted(
    tasks: &crate::store::TaskStore,
    stats: &SharedStats,
    task: &Task,
    detail: &str,
) {
    let outcome = TaskOutcome::failed(format!(
        "retries exhausted after {} attempts: {}",
        task.retry_count + 1,
        detail
    ));

    match tasks.complete(task.id, &outcome).await {
        Ok(()) => {
            stats.failed.fetch_add(1, Ordering::SeqCst);
            metrics::record_task_terminal("failed");
            warn!(
                task_id = %task.id,
                retry_count = task.retry_count,
                error = %detail,
                "retry budget spent, task failed"
            );
        }
        Err(e) => {
            error!(task_id = %task.id, error = %e, "failed to record retry exhaustion");
        }
    }
}

/// Returns whether another transient retry would exceed the budget.
fn retries_exhausted(retry_count: i32, max_retries: u32) -> bool {
    retry_count >= 0 && retry_count as u32 >= max_retries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_exhausted_boundary() {
        assert!(!retries_exhausted(0, 5));
        assert!(!retries_exhausted(4, 5));
        assert!(retries_exhausted(5, 5));
        assert!(retries_exhausted(6, 5));
    }

    #[test]
    fn test_shared_stats_snapshot() {
        let stats = SharedStats::default();
        stats.claimed.fetch_add(3, Ordering::SeqCst);
        stats.completed.fetch_add(2, Ordering::SeqCst);
        stats.failed.fetch_add(1, Ordering::SeqCst);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.claimed, 3);
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.retried, 0);
        assert_eq!(snapshot.idle_ticks, 0);
    }
}
