//! Administrative endpoints backing the queue-manager tooling.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::store::{Task, TaskStatus, TaskSummary};

use super::handlers::{store_error, ErrorBody};
use super::AppState;

/// Default priority applied by a force-requeue.
const REQUEUE_PRIORITY: i32 = 10;

/// Default number of rows in queue listings.
const DEFAULT_LIST_LIMIT: i64 = 50;

// ── Queue listing ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_queue(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TaskSummary>>, (StatusCode, Json<ErrorBody>)> {
    let status = match params.status.as_deref() {
        Some(raw) => raw.parse::<TaskStatus>().map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody { error: e }),
            )
        })?,
        None => TaskStatus::Pending,
    };

    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500);

    let summaries = state
        .store
        .tasks()
        .list_by_status(status, limit)
        .await
        .map_err(store_error)?;

    Ok(Json(summaries))
}

// ── Force requeue ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RequeueParams {
    #[serde(default)]
    pub priority: Option<i32>,
}

pub async fn requeue_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
    Query(params): Query<RequeueParams>,
) -> Result<Json<Task>, (StatusCode, Json<ErrorBody>)> {
    let priority = params.priority.unwrap_or(REQUEUE_PRIORITY);

    let task = state
        .store
        .tasks()
        .requeue_document(document_id, priority)
        .await
        .map_err(store_error)?;

    info!(
        task_id = %task.id,
        document_id = %document_id,
        priority = priority,
        "document force-requeued"
    );

    Ok(Json(task))
}

// ── Bulk repairs ──────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ResetStuckResponse {
    pub reset: usize,
    pub failed: usize,
}

pub async fn reset_stuck(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetStuckResponse>, (StatusCode, Json<ErrorBody>)> {
    let sweep = state
        .store
        .tasks()
        .reset_stuck(
            state.config.stuck_threshold,
            state.config.stuck_max_auto_retries,
        )
        .await
        .map_err(store_error)?;

    info!(
        reset = sweep.reset.len(),
        failed = sweep.failed.len(),
        "manual stuck-task reset"
    );

    Ok(Json(ResetStuckResponse {
        reset: sweep.reset.len(),
        failed: sweep.failed.len(),
    }))
}

#[derive(Serialize)]
pub struct RetryFailedResponse {
    pub requeued: u64,
}

pub async fn retry_failed(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RetryFailedResponse>, (StatusCode, Json<ErrorBody>)> {
    let requeued = state
        .store
        .tasks()
        .retry_failed()
        .await
        .map_err(store_error)?;

    info!(requeued = requeued, "failed tasks requeued");

    Ok(Json(RetryFailedResponse { requeued }))
}
