//! HTTP dispatch of pipeline phases to a remote GPU worker.
//!
//! Each dispatch POSTs one phase to the worker's `/process` endpoint with
//! the task's file path and a callback URL. The worker either answers
//! inline (200 with the phase payload) or accepts the work for later
//! delivery via the callback endpoint (202).
//!
//! Transport problems and 5xx answers are transient; an explicit phase
//! failure reported by the worker is fatal for the task.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::store::{Task, WorkerServer};

use super::phase::Phase;

/// Errors that can occur while dispatching a phase.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The worker could not be reached.
    #[error("Worker unreachable: {0}")]
    Unreachable(String),

    /// The dispatch call or result wait timed out.
    #[error("Phase timed out after {0:?}")]
    Timeout(Duration),

    /// The worker answered with an unexpected HTTP status.
    #[error("Worker API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// The worker reported an explicit failure for the phase.
    #[error("Phase {phase} failed: {message}")]
    PhaseFailed { phase: Phase, message: String },

    /// The worker's response body could not be interpreted.
    #[error("Invalid worker response: {0}")]
    InvalidResponse(String),
}

impl DispatchError {
    /// Returns whether retrying the task later could succeed.
    ///
    /// Transport errors, timeouts, and 5xx answers are infrastructure
    /// problems; phase failures and malformed or 4xx answers are not.
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Unreachable(_) | DispatchError::Timeout(_) => true,
            DispatchError::Api { code, .. } => *code >= 500,
            DispatchError::PhaseFailed { .. } | DispatchError::InvalidResponse(_) => false,
        }
    }
}

/// Request body sent to the worker for one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseRequest {
    /// Task being processed.
    pub task_id: Uuid,
    /// Document the task belongs to.
    pub document_id: Uuid,
    /// Phase to execute.
    pub phase: Phase,
    /// Input artifact location on shared storage.
    pub file_path: String,
    /// URL the worker posts asynchronous results to.
    pub callback_url: String,
    /// Phase-specific options.
    pub options: serde_json::Value,
}

/// Response body for a synchronous (200) worker answer.
#[derive(Debug, Clone, Deserialize)]
struct PhaseResponse {
    status: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Outcome of one dispatch call.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    /// The worker completed the phase inline; payload attached.
    Completed(serde_json::Value),
    /// The worker accepted the phase; the result arrives on the callback
    /// endpoint.
    Accepted,
}

/// Sends claimed phases to remote workers over HTTP.
pub struct WorkerDispatcher {
    client: Client,
    callback_url: String,
    dispatch_timeout: Duration,
}

impl WorkerDispatcher {
    /// Creates a dispatcher.
    ///
    /// # Arguments
    ///
    /// * `callback_url` - URL handed to workers for asynchronous results
    /// * `dispatch_timeout` - timeout for the dispatch HTTP call itself
    pub fn new(
        callback_url: impl Into<String>,
        dispatch_timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(dispatch_timeout)
            .build()
            .map_err(|e| DispatchError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            callback_url: callback_url.into(),
            dispatch_timeout,
        })
    }

    /// Dispatches one phase of a task to the given worker.
    ///
    /// # Errors
    ///
    /// Returns a transient `DispatchError` when the worker is unreachable
    /// or answers 5xx, and a fatal one when the worker reports an explicit
    /// phase failure or an uninterpretable body.
    pub async fn dispatch_phase(
        &self,
        worker: &WorkerServer,
        task: &Task,
        phase: Phase,
    ) -> Result<PhaseOutcome, DispatchError> {
        let url = format!("{}/process", worker.endpoint_url.trim_end_matches('/'));

        let request = PhaseRequest {
            task_id: task.id,
            document_id: task.document_id,
            phase,
            file_path: task.file_path.clone(),
            callback_url: self.callback_url.clone(),
            options: serde_json::json!({ "task_type": task.task_type }),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        match response.status().as_u16() {
            200 => {
                let body: PhaseResponse = response
                    .json()
                    .await
                    .map_err(|e| DispatchError::InvalidResponse(e.to_string()))?;

                match body.status.as_str() {
                    "completed" => Ok(PhaseOutcome::Completed(
                        body.result.unwrap_or(serde_json::Value::Null),
                    )),
                    "failed" => Err(DispatchError::PhaseFailed {
                        phase,
                        message: body
                            .error
                            .unwrap_or_else(|| "worker reported failure without detail".to_string()),
                    }),
                    other => Err(DispatchError::InvalidResponse(format!(
                        "unexpected phase status '{}'",
                        other
                    ))),
                }
            }
            202 => Ok(PhaseOutcome::Accepted),
            code => {
                let message = response.text().await.unwrap_or_default();
                Err(DispatchError::Api { code, message })
            }
        }
    }

    /// Maps a reqwest transport error into the dispatch taxonomy.
    fn map_transport_error(&self, error: reqwest::Error) -> DispatchError {
        if error.is_timeout() {
            DispatchError::Timeout(self.dispatch_timeout)
        } else {
            DispatchError::Unreachable(error.to_string())
        }
    }

    /// Returns the callback URL handed to workers.
    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DispatchError::Unreachable("refused".to_string()).is_transient());
        assert!(DispatchError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(DispatchError::Api {
            code: 503,
            message: "overloaded".to_string()
        }
        .is_transient());

        assert!(!DispatchError::Api {
            code: 400,
            message: "bad request".to_string()
        }
        .is_transient());
        assert!(!DispatchError::PhaseFailed {
            phase: Phase::DataExtraction,
            message: "no fields found".to_string()
        }
        .is_transient());
        assert!(!DispatchError::InvalidResponse("garbage".to_string()).is_transient());
    }

    #[test]
    fn test_phase_request_serialization() {
        let request = PhaseRequest {
            task_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            phase: Phase::VisualAnalysis,
            file_path: "/mnt/uploads/deck.pdf".to_string(),
            callback_url: "http://localhost:8080/worker/callback".to_string(),
            options: serde_json::json!({ "task_type": "pdf_analysis" }),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["phase"], "visual_analysis");
        assert_eq!(json["file_path"], "/mnt/uploads/deck.pdf");
        assert_eq!(json["options"]["task_type"], "pdf_analysis");
    }

    #[test]
    fn test_phase_response_parsing() {
        let completed: PhaseResponse =
            serde_json::from_str(r#"{"status": "completed", "result": {"pages": 12}}"#).unwrap();
        assert_eq!(completed.status, "completed");
        assert_eq!(completed.result.unwrap()["pages"], 12);

        let failed: PhaseResponse =
            serde_json::from_str(r#"{"status": "failed", "error": "corrupt pdf"}"#).unwrap();
        assert_eq!(failed.status, "failed");
        assert_eq!(failed.error.unwrap(), "corrupt pdf");
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = DispatchError::PhaseFailed {
            phase: Phase::DataExtraction,
            message: "no fields found".to_string(),
        };
        assert!(err.to_string().contains("data_extraction"));
        assert!(err.to_string().contains("no fields found"));
    }
}
