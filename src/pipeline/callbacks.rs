//! Rendezvous between dispatched phases and worker callbacks.
//!
//! When a worker accepts a phase asynchronously (202), the pipeline
//! runner parks on a oneshot channel registered here; the HTTP callback
//! handler fulfils it when the worker posts the result. Registration
//! happens before the dispatch call so a fast worker cannot race the
//! runner.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use super::phase::Phase;

/// Result payload delivered by a worker callback: the phase output, or
/// the worker's error detail.
pub type PhasePayload = Result<serde_json::Value, String>;

/// Routes worker callbacks to the pipeline runs awaiting them.
#[derive(Default)]
pub struct CallbackRouter {
    pending: Mutex<HashMap<(Uuid, Phase), oneshot::Sender<PhasePayload>>>,
}

impl CallbackRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending phase and returns the receiver the runner
    /// awaits.
    ///
    /// A leftover registration for the same task and phase (from an
    /// abandoned attempt) is replaced; its receiver observes a closed
    /// channel.
    pub fn register(&self, task_id: Uuid, phase: Phase) -> oneshot::Receiver<PhasePayload> {
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.insert((task_id, phase), tx).is_some() {
            warn!(task_id = %task_id, phase = %phase, "replaced stale callback registration");
        }

        rx
    }

    /// Removes a registration without fulfilling it.
    ///
    /// Called when the phase completed inline or the wait timed out.
    pub fn deregister(&self, task_id: Uuid, phase: Phase) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&(task_id, phase));
    }

    /// Delivers a worker callback to the waiting runner.
    ///
    /// Returns `false` when nothing is waiting - an unknown task, a phase
    /// that already completed, or a duplicate post. The caller logs and
    /// answers the worker either way; a stray callback is never an error.
    pub fn fulfill(&self, task_id: Uuid, phase: Phase, payload: PhasePayload) -> bool {
        let sender = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(&(task_id, phase))
        };

        match sender {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Number of phases currently awaiting callbacks.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_fulfill() {
        let router = CallbackRouter::new();
        let task_id = Uuid::new_v4();

        let rx = router.register(task_id, Phase::VisualAnalysis);
        assert_eq!(router.pending_count(), 1);

        let delivered = router.fulfill(
            task_id,
            Phase::VisualAnalysis,
            Ok(serde_json::json!({"pages": 3})),
        );
        assert!(delivered);
        assert_eq!(router.pending_count(), 0);

        let payload = rx.await.unwrap().unwrap();
        assert_eq!(payload["pages"], 3);
    }

    #[tokio::test]
    async fn test_fulfill_unknown_callback() {
        let router = CallbackRouter::new();

        let delivered = router.fulfill(
            Uuid::new_v4(),
            Phase::DataExtraction,
            Err("no one listening".to_string()),
        );
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_duplicate_fulfill_is_rejected() {
        let router = CallbackRouter::new();
        let task_id = Uuid::new_v4();

        let _rx = router.register(task_id, Phase::VisualAnalysis);

        assert!(router.fulfill(task_id, Phase::VisualAnalysis, Ok(serde_json::Value::Null)));
        assert!(!router.fulfill(task_id, Phase::VisualAnalysis, Ok(serde_json::Value::Null)));
    }

    #[tokio::test]
    async fn test_deregister_drops_sender() {
        let router = CallbackRouter::new();
        let task_id = Uuid::new_v4();

        let rx = router.register(task_id, Phase::TemplateProcessing);
        router.deregister(task_id, Phase::TemplateProcessing);

        // Sender dropped: receiver observes a closed channel.
        assert!(rx.await.is_err());
        assert!(!router.fulfill(task_id, Phase::TemplateProcessing, Ok(serde_json::Value::Null)));
    }

    #[tokio::test]
    async fn test_reregister_replaces_previous() {
        let router = CallbackRouter::new();
        let task_id = Uuid::new_v4();

        let stale_rx = router.register(task_id, Phase::VisualAnalysis);
        let fresh_rx = router.register(task_id, Phase::VisualAnalysis);

        assert_eq!(router.pending_count(), 1);
        assert!(stale_rx.await.is_err());

        router.fulfill(task_id, Phase::VisualAnalysis, Ok(serde_json::Value::Null));
        assert!(fresh_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_same_task_different_phases() {
        let router = CallbackRouter::new();
        let task_id = Uuid::new_v4();

        let _rx1 = router.register(task_id, Phase::VisualAnalysis);
        let _rx2 = router.register(task_id, Phase::DataExtraction);

        assert_eq!(router.pending_count(), 2);
    }
}
