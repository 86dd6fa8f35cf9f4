//! Task submission, status reads, and worker-facing endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::pipeline::Phase;
use crate::store::servers::Heartbeat;
use crate::store::{NewTask, ProgressEvent, StatusSnapshot, StoreError, WorkerServer};

use super::AppState;

/// JSON error body returned by every failing handler.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable error detail.
    pub error: String,
}

/// Maps a store error onto an HTTP response.
pub(super) fn store_error(e: StoreError) -> (StatusCode, Json<ErrorBody>) {
    let status = match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::StaleClaim(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorBody {
            error: e.to_string(),
        }),
    )
}

// ── Health ────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Task submission & status ──────────────────────────────────────

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub task_id: Uuid,
    pub document_id: Uuid,
    pub status: crate::store::TaskStatus,
}

pub async fn enqueue_task(
    State(state): State<Arc<AppState>>,
    Json(new_task): Json<NewTask>,
) -> Result<(StatusCode, Json<EnqueueResponse>), (StatusCode, Json<ErrorBody>)> {
    let task = state
        .store
        .tasks()
        .enqueue(new_task)
        .await
        .map_err(store_error)?;

    info!(
        task_id = %task.id,
        document_id = %task.document_id,
        priority = task.priority,
        "task enqueued"
    );

    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            task_id: task.id,
            document_id: task.document_id,
            status: task.status,
        }),
    ))
}

pub async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<StatusSnapshot>, (StatusCode, Json<ErrorBody>)> {
    let snapshot = state
        .store
        .tasks()
        .status_snapshot(document_id)
        .await
        .map_err(store_error)?;

    match snapshot {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("no task for document {}", document_id),
            }),
        )),
    }
}

pub async fn task_progress(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<Vec<ProgressEvent>>, (StatusCode, Json<ErrorBody>)> {
    let task = state
        .store
        .tasks()
        .find_by_document(document_id)
        .await
        .map_err(store_error)?;

    let Some(task) = task else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("no task for document {}", document_id),
            }),
        ));
    };

    let events = state
        .store
        .progress()
        .history(task.id)
        .await
        .map_err(store_error)?;

    Ok(Json(events))
}

// ── Worker callback & heartbeat ───────────────────────────────────

/// Body posted by a worker when an asynchronously accepted phase finishes.
#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    pub task_id: Uuid,
    pub document_id: Uuid,
    pub phase: Phase,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct CallbackAck {
    pub delivered: bool,
}

pub async fn worker_callback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CallbackBody>,
) -> Json<CallbackAck> {
    let payload = match body.error {
        Some(error) => Err(error),
        None => Ok(body.result.unwrap_or(serde_json::Value::Null)),
    };

    let delivered = state.callbacks.fulfill(body.task_id, body.phase, payload);

    if delivered {
        metrics::record_callback("delivered");
    } else {
        // Stray callbacks happen when a phase already timed out or the
        // task was repaired; answer the worker and move on.
        metrics::record_callback("stray");
        warn!(
            task_id = %body.task_id,
            document_id = %body.document_id,
            phase = %body.phase,
            "received callback with no pending phase"
        );
    }

    Json(CallbackAck { delivered })
}

pub async fn worker_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(beat): Json<Heartbeat>,
) -> Result<Json<WorkerServer>, (StatusCode, Json<ErrorBody>)> {
    let worker = state
        .store
        .servers()
        .heartbeat(&beat)
        .await
        .map_err(store_error)?;

    Ok(Json(worker))
}
