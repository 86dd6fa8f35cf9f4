//! HTTP surface: enqueue, status, worker callback, and admin endpoints.
//!
//! Assembles all axum routes over a shared `AppState`. The worker-facing
//! endpoints (`/worker/callback`, `/worker/heartbeat`) are consumed by
//! the GPU workers; the `/admin` routes back the queue-manager tooling.

pub mod admin;
pub mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use tracing::info;

use crate::config::OrchestratorConfig;
use crate::pipeline::CallbackRouter;
use crate::store::Store;

/// Errors that can occur while serving HTTP.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bind or accept failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state handed to every handler.
pub struct AppState {
    /// Task store handle.
    pub store: Store,
    /// Rendezvous for asynchronous worker results.
    pub callbacks: Arc<CallbackRouter>,
    /// Orchestrator configuration.
    pub config: OrchestratorConfig,
}

/// Build the complete application router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .route("/tasks", post(handlers::enqueue_task))
        .route("/tasks/{document_id}/status", get(handlers::task_status))
        .route(
            "/tasks/{document_id}/progress",
            get(handlers::task_progress),
        )
        .route("/worker/callback", post(handlers::worker_callback))
        .route("/worker/heartbeat", post(handlers::worker_heartbeat))
        .route("/admin/queue", get(admin::list_queue))
        .route("/admin/requeue/{document_id}", post(admin::requeue_document))
        .route("/admin/reset-stuck", post(admin::reset_stuck))
        .route("/admin/retry-failed", post(admin::retry_failed))
        .with_state(state)
}

/// Binds the configured address and serves until the shutdown future
/// resolves.
pub async fn serve(
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let bind_addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!(bind_addr = %bind_addr, "HTTP server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
