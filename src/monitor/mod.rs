//! Health monitor: periodic repair of stalled state.
//!
//! Runs three independent sweeps on a fixed period:
//!
//! - **Stuck tasks**: `processing` rows whose attempt started too long
//!   ago are reset to `pending` while automatic retries remain, then
//!   failed with a synthetic timeout error
//! - **Idle transactions**: connections idle-in-transaction beyond a soft
//!   threshold are flagged, beyond a hard threshold terminated, so lock
//!   and table bloat cannot accumulate under the queue
//! - **Dead workers**: registry rows with expired heartbeats are marked
//!   unavailable and excluded from dispatch
//!
//! Every corrective action is logged with before/after counts; none are
//! silent. A high correction volume raises the restart flag so the
//! deployment can bounce the owning service.

use serde::Serialize;
use sqlx::Row;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::metrics;
use crate::store::{Store, StoreError, TaskStatus};

/// Errors that can occur during a monitor sweep.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Query against the transactional substrate failed.
    #[error("Activity query failed: {0}")]
    ActivityQuery(#[from] sqlx::Error),
}

/// Outcome of one monitor sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorReport {
    /// Stuck tasks reset to `pending`.
    pub stuck_reset: usize,
    /// Stuck tasks failed because their automatic retries were spent.
    pub stuck_failed: usize,
    /// Idle-in-transaction connections past the soft threshold.
    pub idle_flagged: usize,
    /// Idle-in-transaction connections terminated.
    pub idle_terminated: usize,
    /// Workers marked unavailable for missed heartbeats.
    pub workers_marked_dead: usize,
    /// Whether the corrective volume warrants a dependent-service restart.
    pub restart_triggered: bool,
}

/// Periodically audits the task store and worker registry.
pub struct HealthMonitor {
    store: Store,
    config: OrchestratorConfig,
}

impl HealthMonitor {
    /// Creates a health monitor.
    pub fn new(store: Store, config: OrchestratorConfig) -> Self {
        Self { store, config }
    }

    /// Runs sweeps on the configured period until shutdown.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(self.config.monitor_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.monitor_interval.as_secs(),
            "health monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("health monitor received shutdown signal");
                    break;
                }
                _ = tick.tick() => {
                    match self.sweep().await {
                        Ok(report) => {
                            if report.restart_triggered {
                                warn!(?report, "monitor sweep requests dependent-service restart");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "monitor sweep failed");
                        }
                    }
                }
            }
        }

        info!("health monitor stopped");
    }

    /// Runs one full sweep and returns what was corrected.
    pub async fn sweep(&self) -> Result<MonitorReport, MonitorError> {
        let mut report = MonitorReport::default();

        self.sweep_stuck_tasks(&mut report).await?;
        self.sweep_idle_transactions(&mut report).await?;
        self.sweep_dead_workers(&mut report).await?;
        self.publish_queue_depth().await?;

        report.restart_triggered = should_trigger_restart(
            report.stuck_reset + report.stuck_failed,
            report.idle_terminated,
            self.config.restart_threshold,
        );

        Ok(report)
    }

    /// Resets or fails tasks stuck in `processing`.
    async fn sweep_stuck_tasks(&self, report: &mut MonitorReport) -> Result<(), MonitorError> {
        let tasks = self.store.tasks();
        let processing_before = count_for(&tasks.count_by_status().await?, TaskStatus::Processing);

        let sweep = tasks
            .reset_stuck(self.config.stuck_threshold, self.config.stuck_max_auto_retries)
            .await?;

        report.stuck_reset = sweep.reset.len();
        report.stuck_failed = sweep.failed.len();

        if sweep.total() > 0 {
            let processing_after =
                count_for(&tasks.count_by_status().await?, TaskStatus::Processing);

            metrics::add_stuck_resets(sweep.total() as u64);
            info!(
                processing_before = processing_before,
                processing_after = processing_after,
                reset = report.stuck_reset,
                failed = report.stuck_failed,
                threshold_secs = self.config.stuck_threshold.as_secs(),
                "stuck task sweep corrected tasks"
            );
        }

        Ok(())
    }

    /// Flags and terminates idle-in-transaction connections.
    async fn sweep_idle_transactions(&self, report: &mut MonitorReport) -> Result<(), MonitorError> {
        let rows = sqlx::query(
            r#"
            SELECT pid, EXTRACT(EPOCH FROM (NOW() - state_change))::BIGINT AS idle_secs
            FROM pg_stat_activity
            WHERE state = 'idle in transaction'
              AND datname = current_database()
              AND pid <> pg_backend_pid()
            "#,
        )
        .fetch_all(self.store.pool())
        .await?;

        let soft = self.config.idle_tx_soft_threshold.as_secs() as i64;
        let hard = self.config.idle_tx_hard_threshold.as_secs() as i64;

        for row in rows {
            let pid: i32 = row.get("pid");
            let idle_secs: i64 = row.get("idle_secs");

            if idle_secs >= hard {
                let terminated: bool = sqlx::query("SELECT pg_terminate_backend($1) AS ok")
                    .bind(pid)
                    .fetch_one(self.store.pool())
                    .await?
                    .get("ok");

                if terminated {
                    report.idle_terminated += 1;
                    warn!(pid = pid, idle_secs = idle_secs, "terminated idle-in-transaction backend");
                }
            } else if idle_secs >= soft {
                report.idle_flagged += 1;
                warn!(pid = pid, idle_secs = idle_secs, "idle-in-transaction backend flagged");
            }
        }

        Ok(())
    }

    /// Marks workers with expired heartbeats unavailable.
    async fn sweep_dead_workers(&self, report: &mut MonitorReport) -> Result<(), MonitorError> {
        let marked = self
            .store
            .servers()
            .mark_stale_unavailable(self.config.worker_heartbeat_timeout)
            .await?;

        report.workers_marked_dead = marked.len();

        if !marked.is_empty() {
            warn!(
                workers = ?marked,
                heartbeat_timeout_secs = self.config.worker_heartbeat_timeout.as_secs(),
                "marked workers unavailable for missed heartbeats"
            );
        }

        Ok(())
    }

    /// Refreshes the queue-depth gauges from the store.
    async fn publish_queue_depth(&self) -> Result<(), MonitorError> {
        for (status, count) in self.store.tasks().count_by_status().await? {
            metrics::set_queue_depth(status.as_str(), count);
        }

        Ok(())
    }
}

/// Restart decision: triggered when corrections exceeded the threshold.
fn should_trigger_restart(stuck_corrected: usize, idle_terminated: usize, threshold: usize) -> bool {
    stuck_corrected > threshold || idle_terminated > threshold
}

/// Looks up the count for one status in a `count_by_status` result.
fn count_for(counts: &[(TaskStatus, i64)], status: TaskStatus) -> i64 {
    counts
        .iter()
        .find(|(s, _)| *s == status)
        .map(|(_, c)| *c)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_trigger_boundary() {
        // 12 stuck tasks corrected against a threshold of 10 must trigger.
        assert!(should_trigger_restart(12, 0, 10));
        // Exactly at the threshold does not.
        assert!(!should_trigger_restart(10, 0, 10));
        assert!(!should_trigger_restart(0, 0, 10));
    }

    #[test]
    fn test_restart_trigger_on_terminations() {
        assert!(should_trigger_restart(0, 11, 10));
        assert!(!should_trigger_restart(0, 10, 10));
    }

    #[test]
    fn test_count_for() {
        let counts = vec![
            (TaskStatus::Pending, 7),
            (TaskStatus::Processing, 3),
        ];

        assert_eq!(count_for(&counts, TaskStatus::Processing), 3);
        assert_eq!(count_for(&counts, TaskStatus::Failed), 0);
    }

    #[test]
    fn test_report_serializes() {
        let report = MonitorReport {
            stuck_reset: 8,
            stuck_failed: 4,
            idle_flagged: 1,
            idle_terminated: 0,
            workers_marked_dead: 2,
            restart_triggered: true,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stuck_reset"], 8);
        assert_eq!(json["restart_triggered"], true);
    }
}
