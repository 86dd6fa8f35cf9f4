//! Task rows and the privileged queue operations.
//!
//! This module owns the `processing_tasks` table: enqueue, the atomic
//! claim used by the scheduler, terminal transitions, retry releases, and
//! the administrative operations exposed by the queue-manager tooling.
//!
//! The claim is a single conditional UPDATE (`FOR UPDATE SKIP LOCKED`),
//! never a read followed by a separate write, so any number of scheduler
//! instances may poll the same store without double-claiming a row.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::StoreError;

/// Maximum characters of `last_error` included in queue listings.
const ERROR_PREVIEW_CHARS: usize = 120;

/// Columns selected or returned for a full task row.
const TASK_COLUMNS: &str = "id, document_id, task_type, status, priority, file_path, \
     current_step, progress_percentage, progress_message, retry_count, last_error, \
     next_retry_at, created_at, started_at, completed_at, company_id";

/// Status of a processing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed and currently running the pipeline.
    Processing,
    /// All phases finished successfully.
    Completed,
    /// Terminally failed.
    Failed,
    /// Released after a transient failure, waiting out its backoff.
    Retry,
}

impl TaskStatus {
    /// Returns the wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Retry => "retry",
        }
    }

    /// Returns whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "retry" => Ok(TaskStatus::Retry),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One document's journey through the processing pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    /// Unique identifier, generated at enqueue.
    pub id: Uuid,
    /// Reference to the uploaded artifact; not owned by this subsystem.
    pub document_id: Uuid,
    /// Which pipeline this task runs (e.g. `pdf_analysis`).
    pub task_type: String,
    /// Current queue status.
    pub status: TaskStatus,
    /// Higher priority is served first.
    pub priority: i32,
    /// Location of the input artifact on shared storage.
    pub file_path: String,
    /// Pipeline phase currently executing, if any.
    pub current_step: Option<String>,
    /// 0-100, monotonically non-decreasing within one attempt.
    pub progress_percentage: i16,
    /// Free-text status, replaced on every update.
    pub progress_message: Option<String>,
    /// Times requeued after failure.
    pub retry_count: i32,
    /// Most recent failure detail.
    pub last_error: Option<String>,
    /// Earliest time a `retry` row becomes claimable again.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When the task was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the current attempt started; set exactly once per attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Tenant attribute, opaque to scheduling.
    pub company_id: Option<Uuid>,
}

/// Input for enqueueing a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    /// Reference to the uploaded artifact.
    pub document_id: Uuid,
    /// Location of the input artifact on shared storage.
    pub file_path: String,
    /// Which pipeline to run.
    #[serde(default = "NewTask::default_task_type")]
    pub task_type: String,
    /// Scheduling priority; higher is served first.
    #[serde(default)]
    pub priority: i32,
    /// Tenant attribute.
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

impl NewTask {
    /// Creates a new task submission with default type and priority.
    pub fn new(document_id: Uuid, file_path: impl Into<String>) -> Self {
        Self {
            document_id,
            file_path: file_path.into(),
            task_type: Self::default_task_type(),
            priority: 0,
            company_id: None,
        }
    }

    fn default_task_type() -> String {
        "pdf_analysis".to_string()
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the task type.
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    /// Sets the tenant.
    pub fn with_company_id(mut self, company_id: Uuid) -> Self {
        self.company_id = Some(company_id);
        self
    }
}

/// Terminal outcome of a processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// All phases finished.
    Completed,
    /// A phase reported a non-retryable failure, or retries are exhausted.
    Failed {
        /// Failure detail stored on the task row.
        error: String,
    },
}

impl TaskOutcome {
    /// Creates a failed outcome.
    pub fn failed(error: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            error: error.into(),
        }
    }
}

/// Read-only status snapshot exposed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Current queue status.
    pub status: TaskStatus,
    /// Pipeline phase currently executing, if any.
    pub current_step: Option<String>,
    /// Latest recorded percentage.
    pub progress_percentage: i16,
    /// Latest recorded message.
    pub progress_message: Option<String>,
    /// Times requeued after failure.
    pub retry_count: i32,
    /// Most recent failure detail.
    pub last_error: Option<String>,
}

/// Condensed task row for queue listings.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    /// Task identifier.
    pub id: Uuid,
    /// Document identifier.
    pub document_id: Uuid,
    /// Pipeline name.
    pub task_type: String,
    /// Current queue status.
    pub status: TaskStatus,
    /// Scheduling priority.
    pub priority: i32,
    /// Times requeued after failure.
    pub retry_count: i32,
    /// Seconds from attempt start to completion (or to now while running).
    pub duration_seconds: Option<i64>,
    /// Truncated error detail, if any.
    pub error_preview: Option<String>,
    /// When the task was enqueued.
    pub created_at: DateTime<Utc>,
}

/// Result of a stuck-task sweep.
#[derive(Debug, Clone, Default)]
pub struct StuckSweep {
    /// Tasks reset to `pending` for another automatic attempt.
    pub reset: Vec<Uuid>,
    /// Tasks failed outright because their automatic retries were spent.
    pub failed: Vec<Uuid>,
}

impl StuckSweep {
    /// Total number of corrected tasks.
    pub fn total(&self) -> usize {
        self.reset.len() + self.failed.len()
    }
}

/// Task row operations against the store.
#[derive(Clone)]
pub struct TaskStore {
    pool: PgPool,
}

impl TaskStore {
    /// Creates a task store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueues a new task with status `pending`.
    pub async fn enqueue(&self, new_task: NewTask) -> Result<Task, StoreError> {
        let id = Uuid::new_v4();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO processing_tasks (id, document_id, task_type, priority, file_path, company_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(new_task.document_id)
        .bind(&new_task.task_type)
        .bind(new_task.priority)
        .bind(&new_task.file_path)
        .bind(new_task.company_id)
        .fetch_one(&self.pool)
        .await?;

        task_from_row(&row)
    }

    /// Atomically claims the next eligible task.
    ///
    /// Selects the highest-priority, oldest-created row that is `pending`
    /// (or `retry` with its backoff elapsed), marks it `processing`, stamps
    /// `started_at`, and resets the progress fields for a fresh attempt.
    ///
    /// The claim is one conditional UPDATE with `FOR UPDATE SKIP LOCKED`;
    /// under N concurrent callers and one eligible row, exactly one caller
    /// receives the task and the rest receive `None`.
    pub async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE processing_tasks
            SET status = 'processing',
                started_at = NOW(),
                current_step = NULL,
                progress_percentage = 0,
                progress_message = NULL,
                next_retry_at = NULL
            WHERE id = (
                SELECT id FROM processing_tasks
                WHERE status = 'pending'
                   OR (status = 'retry' AND next_retry_at <= NOW())
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    /// Records the terminal outcome of a processing attempt.
    ///
    /// Only a row still owned by the caller (status `processing`) can be
    /// completed; anything else reports `StaleClaim` or `NotFound` rather
    /// than silently overwriting newer state.
    pub async fn complete(&self, task_id: Uuid, outcome: &TaskOutcome) -> Result<(), StoreError> {
        let result = match outcome {
            TaskOutcome::Completed => {
                sqlx::query(
                    r#"
                    UPDATE processing_tasks
                    SET status = 'completed',
                        completed_at = NOW(),
                        progress_percentage = 100,
                        progress_message = 'processing complete',
                        last_error = NULL
                    WHERE id = $1 AND status = 'processing'
                    "#,
                )
                .bind(task_id)
                .execute(&self.pool)
                .await?
            }
            TaskOutcome::Failed { error } => {
                sqlx::query(
                    r#"
                    UPDATE processing_tasks
                    SET status = 'failed',
                        completed_at = NOW(),
                        last_error = $2
                    WHERE id = $1 AND status = 'processing'
                    "#,
                )
                .bind(task_id)
                .bind(error)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(self.claim_conflict(task_id).await?);
        }

        Ok(())
    }

    /// Returns a dispatched-but-unstarted task to `pending`.
    ///
    /// Used when the worker was unreachable before any phase ran, so the
    /// task must become claimable on the next tick rather than sitting
    /// `processing` forever.
    pub async fn release_to_pending(&self, task_id: Uuid, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE processing_tasks
            SET status = 'pending',
                started_at = NULL,
                retry_count = retry_count + 1,
                last_error = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.claim_conflict(task_id).await?);
        }

        Ok(())
    }

    /// Releases a task for a delayed retry after a transient failure.
    pub async fn release_for_retry(
        &self,
        task_id: Uuid,
        error: &str,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE processing_tasks
            SET status = 'retry',
                started_at = NULL,
                retry_count = retry_count + 1,
                last_error = $2,
                next_retry_at = NOW() + make_interval(secs => $3)
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(task_id)
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.claim_conflict(task_id).await?);
        }

        Ok(())
    }

    /// Retrieves a task by its ID.
    pub async fn get(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM processing_tasks WHERE id = $1",
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    /// Retrieves the most recent task for a document.
    pub async fn find_by_document(&self, document_id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM processing_tasks
            WHERE document_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    /// Returns the read-only status snapshot for a document.
    pub async fn status_snapshot(
        &self,
        document_id: Uuid,
    ) -> Result<Option<StatusSnapshot>, StoreError> {
        let task = self.find_by_document(document_id).await?;

        Ok(task.map(|t| StatusSnapshot {
            status: t.status,
            current_step: t.current_step,
            progress_percentage: t.progress_percentage,
            progress_message: t.progress_message,
            retry_count: t.retry_count,
            last_error: t.last_error,
        }))
    }

    /// Lists tasks by status with duration and error preview.
    pub async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
    ) -> Result<Vec<TaskSummary>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM processing_tasks
            WHERE status = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let task = task_from_row(row)?;
            summaries.push(summarize(&task, Utc::now()));
        }

        Ok(summaries)
    }

    /// Counts tasks per status, for queue-depth reporting.
    pub async fn count_by_status(&self) -> Result<Vec<(TaskStatus, i64)>, StoreError> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS count FROM processing_tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            let status = status
                .parse::<TaskStatus>()
                .map_err(StoreError::InvalidValue)?;
            counts.push((status, count));
        }

        Ok(counts)
    }

    /// Force-requeues a document's task at an elevated priority.
    ///
    /// Clears terminal state and timestamps so the next claim starts a
    /// fresh attempt.
    pub async fn requeue_document(
        &self,
        document_id: Uuid,
        priority: i32,
    ) -> Result<Task, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE processing_tasks
            SET status = 'pending',
                priority = $2,
                retry_count = retry_count + 1,
                last_error = NULL,
                next_retry_at = NULL,
                started_at = NULL,
                completed_at = NULL
            WHERE id = (
                SELECT id FROM processing_tasks
                WHERE document_id = $1
                ORDER BY created_at DESC
                LIMIT 1
            )
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(document_id)
        .bind(priority)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => task_from_row(&r),
            None => Err(StoreError::NotFound(format!("document {}", document_id))),
        }
    }

    /// Sweeps tasks stuck in `processing` past the staleness threshold.
    ///
    /// Tasks with automatic retries remaining are reset to `pending`
    /// (`started_at` cleared); the rest are failed with a synthetic
    /// timeout error.
    pub async fn reset_stuck(
        &self,
        threshold: Duration,
        max_auto_retries: u32,
    ) -> Result<StuckSweep, StoreError> {
        let reset_rows = sqlx::query(
            r#"
            UPDATE processing_tasks
            SET status = 'pending',
                started_at = NULL,
                current_step = NULL,
                retry_count = retry_count + 1
            WHERE status = 'processing'
              AND started_at < NOW() - make_interval(secs => $1)
              AND retry_count < $2
            RETURNING id
            "#,
        )
        .bind(threshold.as_secs_f64())
        .bind(max_auto_retries as i32)
        .fetch_all(&self.pool)
        .await?;

        let failed_rows = sqlx::query(
            r#"
            UPDATE processing_tasks
            SET status = 'failed',
                completed_at = NOW(),
                last_error = 'processing timed out: task exceeded the stuck-task threshold'
            WHERE status = 'processing'
              AND started_at < NOW() - make_interval(secs => $1)
              AND retry_count >= $2
            RETURNING id
            "#,
        )
        .bind(threshold.as_secs_f64())
        .bind(max_auto_retries as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(StuckSweep {
            reset: reset_rows.iter().map(|r| r.get("id")).collect(),
            failed: failed_rows.iter().map(|r| r.get("id")).collect(),
        })
    }

    /// Requeues every `failed` task for another attempt.
    ///
    /// Resets status to `pending`, increments `retry_count`, and clears
    /// error and timestamps.
    pub async fn retry_failed(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE processing_tasks
            SET status = 'pending',
                retry_count = retry_count + 1,
                last_error = NULL,
                next_retry_at = NULL,
                started_at = NULL,
                completed_at = NULL
            WHERE status = 'failed'
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Distinguishes a missing row from one whose status changed since the
    /// claim, for zero-row conditional updates.
    async fn claim_conflict(&self, task_id: Uuid) -> Result<StoreError, StoreError> {
        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM processing_tasks WHERE id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match exists {
            Some(_) => StoreError::StaleClaim(task_id),
            None => StoreError::NotFound(format!("task {}", task_id)),
        })
    }
}

/// Maps a database row to a `Task`.
fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let status: String = row.get("status");
    let status = status
        .parse::<TaskStatus>()
        .map_err(StoreError::InvalidValue)?;

    Ok(Task {
        id: row.get("id"),
        document_id: row.get("document_id"),
        task_type: row.get("task_type"),
        status,
        priority: row.get("priority"),
        file_path: row.get("file_path"),
        current_step: row.get("current_step"),
        progress_percentage: row.get("progress_percentage"),
        progress_message: row.get("progress_message"),
        retry_count: row.get("retry_count"),
        last_error: row.get("last_error"),
        next_retry_at: row.get("next_retry_at"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        company_id: row.get("company_id"),
    })
}

/// Builds a listing summary from a full task row.
fn summarize(task: &Task, now: DateTime<Utc>) -> TaskSummary {
    let duration_seconds = match (task.started_at, task.completed_at) {
        (Some(start), Some(end)) => Some((end - start).num_seconds()),
        (Some(start), None) => Some((now - start).num_seconds()),
        _ => None,
    };

    TaskSummary {
        id: task.id,
        document_id: task.document_id,
        task_type: task.task_type.clone(),
        status: task.status,
        priority: task.priority,
        retry_count: task.retry_count,
        duration_seconds,
        error_preview: task.last_error.as_deref().map(error_preview),
        created_at: task.created_at,
    }
}

/// Truncates an error message for listing output.
fn error_preview(error: &str) -> String {
    if error.chars().count() <= ERROR_PREVIEW_CHARS {
        return error.to_string();
    }

    let truncated: String = error.chars().take(ERROR_PREVIEW_CHARS).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            task_type: "pdf_analysis".to_string(),
            status: TaskStatus::Pending,
            priority: 0,
            file_path: "/mnt/uploads/deck.pdf".to_string(),
            current_step: None,
            progress_percentage: 0,
            progress_message: None,
            retry_count: 0,
            last_error: None,
            next_retry_at: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
            started_at: None,
            completed_at: None,
            company_id: None,
        }
    }

    #[test]
    fn test_task_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Retry,
        ] {
            let parsed: TaskStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_task_status_parse_unknown() {
        let result = "limbo".parse::<TaskStatus>();
        assert!(result.unwrap_err().contains("limbo"));
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(!TaskStatus::Retry.is_terminal());
    }

    #[test]
    fn test_new_task_builder() {
        let company = Uuid::new_v4();
        let new_task = NewTask::new(Uuid::new_v4(), "/mnt/uploads/deck.pdf")
            .with_priority(10)
            .with_task_type("pdf_analysis")
            .with_company_id(company);

        assert_eq!(new_task.priority, 10);
        assert_eq!(new_task.task_type, "pdf_analysis");
        assert_eq!(new_task.company_id, Some(company));
    }

    #[test]
    fn test_new_task_defaults() {
        let new_task = NewTask::new(Uuid::new_v4(), "/mnt/uploads/deck.pdf");

        assert_eq!(new_task.task_type, "pdf_analysis");
        assert_eq!(new_task.priority, 0);
        assert!(new_task.company_id.is_none());
    }

    #[test]
    fn test_task_outcome_failed() {
        let outcome = TaskOutcome::failed("worker exploded");
        assert_eq!(
            outcome,
            TaskOutcome::Failed {
                error: "worker exploded".to_string()
            }
        );
    }

    #[test]
    fn test_error_preview_short() {
        assert_eq!(error_preview("boom"), "boom");
    }

    #[test]
    fn test_error_preview_truncated() {
        let long = "x".repeat(500);
        let preview = error_preview(&long);

        assert_eq!(preview.chars().count(), ERROR_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_summarize_running_task() {
        let mut task = sample_task();
        let start = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        task.status = TaskStatus::Processing;
        task.started_at = Some(start);

        let now = start + chrono::Duration::seconds(95);
        let summary = summarize(&task, now);

        assert_eq!(summary.duration_seconds, Some(95));
        assert!(summary.error_preview.is_none());
    }

    #[test]
    fn test_summarize_completed_task() {
        let mut task = sample_task();
        let start = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        task.status = TaskStatus::Completed;
        task.started_at = Some(start);
        task.completed_at = Some(start + chrono::Duration::seconds(240));

        let summary = summarize(&task, Utc::now());

        assert_eq!(summary.duration_seconds, Some(240));
    }

    #[test]
    fn test_summarize_unstarted_task() {
        let summary = summarize(&sample_task(), Utc::now());
        assert!(summary.duration_seconds.is_none());
    }

    #[test]
    fn test_stuck_sweep_total() {
        let sweep = StuckSweep {
            reset: vec![Uuid::new_v4(), Uuid::new_v4()],
            failed: vec![Uuid::new_v4()],
        };

        assert_eq!(sweep.total(), 3);
    }

    #[test]
    fn test_new_task_deserializes_with_defaults() {
        let json = format!(
            r#"{{"document_id": "{}", "file_path": "/mnt/uploads/deck.pdf"}}"#,
            Uuid::new_v4()
        );
        let parsed: NewTask = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.task_type, "pdf_analysis");
        assert_eq!(parsed.priority, 0);
    }
}
