//! Per-step progress tracking.
//!
//! Progress is recorded twice on every update, in one transaction: an
//! append-only `progress_events` row for the audit trail, and the task's
//! snapshot columns (`current_step`, `progress_percentage`,
//! `progress_message`) for O(1) status reads.
//!
//! Within a single processing attempt the stored percentage never
//! decreases; the clamp happens in SQL (`GREATEST`) so concurrent writers
//! cannot regress it. A new attempt starts from zero because `claim_next`
//! resets the snapshot fields.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::StoreError;

/// Status of a recorded pipeline step.
pub mod step_status {
    /// The step is executing.
    pub const RUNNING: &str = "running";
    /// The step finished successfully.
    pub const COMPLETED: &str = "completed";
    /// The step failed and aborted the pipeline.
    pub const FAILED: &str = "failed";
}

/// One append-only progress log entry.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Task the event belongs to.
    pub task_id: Uuid,
    /// Pipeline step name.
    pub step_name: String,
    /// Step status (`running`, `completed`, `failed`).
    pub step_status: String,
    /// Percentage recorded with the event (after clamping).
    pub progress_percentage: i16,
    /// Free-text detail.
    pub message: Option<String>,
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

/// Progress recording and history reads.
#[derive(Clone)]
pub struct ProgressTracker {
    pool: PgPool,
}

impl ProgressTracker {
    /// Creates a progress tracker over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records a progress update for a task.
    ///
    /// Updates the task snapshot and appends a `progress_events` row in one
    /// transaction. The percentage is clamped to be non-decreasing within
    /// the current attempt; the event stores the clamped value so the audit
    /// trail matches what readers see.
    ///
    /// Returns the clamped percentage.
    pub async fn record(
        &self,
        task_id: Uuid,
        step_name: &str,
        step_status: &str,
        percentage: i16,
        message: &str,
    ) -> Result<i16, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE processing_tasks
            SET current_step = $2,
                progress_percentage = GREATEST(progress_percentage, $3),
                progress_message = $4
            WHERE id = $1
            RETURNING progress_percentage
            "#,
        )
        .bind(task_id)
        .bind(step_name)
        .bind(percentage.clamp(0, 100))
        .bind(message)
        .fetch_optional(&mut *tx)
        .await?;

        let clamped: i16 = match row {
            Some(r) => r.get("progress_percentage"),
            None => return Err(StoreError::NotFound(format!("task {}", task_id))),
        };

        sqlx::query(
            r#"
            INSERT INTO progress_events (task_id, step_name, step_status, progress_percentage, message)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(task_id)
        .bind(step_name)
        .bind(step_status)
        .bind(clamped)
        .bind(message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(clamped)
    }

    /// Returns the full progress history for a task, oldest first.
    pub async fn history(&self, task_id: Uuid) -> Result<Vec<ProgressEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, step_name, step_status, progress_percentage, message, created_at
            FROM progress_events
            WHERE task_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .into_iter()
            .map(|row| ProgressEvent {
                task_id: row.get("task_id"),
                step_name: row.get("step_name"),
                step_status: row.get("step_status"),
                progress_percentage: row.get("progress_percentage"),
                message: row.get("message"),
                created_at: row.get("created_at"),
            })
            .collect();

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_constants() {
        assert_eq!(step_status::RUNNING, "running");
        assert_eq!(step_status::COMPLETED, "completed");
        assert_eq!(step_status::FAILED, "failed");
    }

    #[test]
    fn test_progress_event_serializes() {
        let event = ProgressEvent {
            task_id: Uuid::new_v4(),
            step_name: "visual_analysis".to_string(),
            step_status: step_status::RUNNING.to_string(),
            progress_percentage: 25,
            message: Some("analyzing page images".to_string()),
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["step_name"], "visual_analysis");
        assert_eq!(json["progress_percentage"], 25);
    }
}
