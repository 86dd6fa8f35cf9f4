//! Integration tests for the PostgreSQL task store.
//!
//! These tests run against a real database and mutate queue state, so
//! they expect a scratch database and serial execution (sweeps operate
//! on the whole table).
//! Run with: DATABASE_URL=postgres://... cargo test --test store_integration -- --ignored --test-threads=1

use std::time::Duration;

use deckflow::store::progress::step_status;
use deckflow::store::servers::Heartbeat;
use deckflow::store::{NewTask, Store, StoreError, TaskOutcome, TaskStatus};
use uuid::Uuid;

fn database_url() -> String {
    std::env::var("DATABASE_URL")
        .expect("DATABASE_URL environment variable must be set for integration tests")
}

async fn test_store() -> Store {
    let store = Store::connect(&database_url())
        .await
        .expect("store should connect");
    store
        .run_migrations()
        .await
        .expect("migrations should apply");
    store
}

#[tokio::test]
#[ignore] // Run with: cargo test --test store_integration -- --ignored
async fn test_claim_is_atomic_under_concurrency() {
    let store = test_store().await;
    let tasks = store.tasks();

    let document_id = Uuid::new_v4();
    let enqueued = tasks
        .enqueue(NewTask::new(document_id, "/mnt/uploads/claim-race.pdf"))
        .await
        .expect("enqueue should succeed");

    // Race N concurrent claims against the single eligible row.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let tasks = store.tasks();
        handles.push(tokio::spawn(async move { tasks.claim_next().await }));
    }

    let mut claims_of_ours = 0;
    for handle in handles {
        let claimed = handle.await.expect("claim task should not panic");
        if let Ok(Some(task)) = claimed {
            if task.id == enqueued.id {
                claims_of_ours += 1;
                assert_eq!(task.status, TaskStatus::Processing);
                assert!(task.started_at.is_some());
            }
        }
    }

    assert_eq!(
        claims_of_ours, 1,
        "exactly one concurrent caller may claim the task"
    );
}

#[tokio::test]
#[ignore]
async fn test_claim_order_is_priority_then_age() {
    let store = test_store().await;
    let tasks = store.tasks();

    let low = tasks
        .enqueue(NewTask::new(Uuid::new_v4(), "/mnt/uploads/d1.pdf").with_priority(5))
        .await
        .expect("enqueue should succeed");
    let high = tasks
        .enqueue(NewTask::new(Uuid::new_v4(), "/mnt/uploads/d2.pdf").with_priority(10))
        .await
        .expect("enqueue should succeed");

    // Drain claims until both of ours surfaced; the higher priority must
    // come out first even though it was enqueued second.
    let mut order = Vec::new();
    for _ in 0..50 {
        match tasks.claim_next().await.expect("claim should succeed") {
            Some(task) if task.id == low.id || task.id == high.id => order.push(task.id),
            Some(_) => continue,
            None => break,
        }
        if order.len() == 2 {
            break;
        }
    }

    assert_eq!(order, vec![high.id, low.id]);
}

#[tokio::test]
#[ignore]
async fn test_complete_rejects_unclaimed_task() {
    let store = test_store().await;
    let tasks = store.tasks();

    let task = tasks
        .enqueue(NewTask::new(Uuid::new_v4(), "/mnt/uploads/pending.pdf"))
        .await
        .expect("enqueue should succeed");

    // Still pending: completing it must report a stale claim.
    let result = tasks.complete(task.id, &TaskOutcome::Completed).await;
    assert!(matches!(result, Err(StoreError::StaleClaim(id)) if id == task.id));

    // Unknown id must report not-found.
    let result = tasks.complete(Uuid::new_v4(), &TaskOutcome::Completed).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
#[ignore]
async fn test_stuck_task_is_reset_and_claimable() {
    let store = test_store().await;
    let tasks = store.tasks();

    let task = tasks
        .enqueue(NewTask::new(Uuid::new_v4(), "/mnt/uploads/stuck.pdf"))
        .await
        .expect("enqueue should succeed");

    // Claim it, then sweep with a zero threshold so the fresh attempt
    // already counts as stuck.
    let mut claimed = None;
    for _ in 0..50 {
        match tasks.claim_next().await.expect("claim should succeed") {
            Some(t) if t.id == task.id => {
                claimed = Some(t);
                break;
            }
            Some(_) => continue,
            None => break,
        }
    }
    claimed.expect("task should be claimable");

    let sweep = tasks
        .reset_stuck(Duration::from_secs(0), 3)
        .await
        .expect("sweep should succeed");
    assert!(sweep.reset.contains(&task.id));

    let repaired = tasks
        .get(task.id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert_eq!(repaired.status, TaskStatus::Pending);
    assert!(repaired.started_at.is_none());
    assert_eq!(repaired.retry_count, 1);
}

#[tokio::test]
#[ignore]
async fn test_stuck_task_fails_after_auto_retry_budget() {
    let store = test_store().await;
    let tasks = store.tasks();

    let task = tasks
        .enqueue(NewTask::new(Uuid::new_v4(), "/mnt/uploads/flappy.pdf"))
        .await
        .expect("enqueue should succeed");

    // Exhaust the auto-retry budget: claim + zero-threshold sweep each
    // round until the sweep fails the task instead of resetting it.
    let mut final_status = TaskStatus::Pending;
    for _ in 0..5 {
        let mut found = false;
        for _ in 0..50 {
            match tasks.claim_next().await.expect("claim should succeed") {
                Some(t) if t.id == task.id => {
                    found = true;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert!(found, "task should remain claimable until failed");

        tasks
            .reset_stuck(Duration::from_secs(0), 2)
            .await
            .expect("sweep should succeed");

        let current = tasks
            .get(task.id)
            .await
            .expect("get should succeed")
            .expect("task should exist");
        final_status = current.status;
        if final_status == TaskStatus::Failed {
            assert!(current.last_error.unwrap().contains("timed out"));
            break;
        }
    }

    assert_eq!(final_status, TaskStatus::Failed);
}

#[tokio::test]
#[ignore]
async fn test_progress_is_monotonic_within_attempt() {
    let store = test_store().await;
    let tasks = store.tasks();
    let progress = store.progress();

    let task = tasks
        .enqueue(NewTask::new(Uuid::new_v4(), "/mnt/uploads/progress.pdf"))
        .await
        .expect("enqueue should succeed");

    let recorded = progress
        .record(task.id, "visual_analysis", step_status::RUNNING, 25, "pages")
        .await
        .expect("record should succeed");
    assert_eq!(recorded, 25);

    // A lower percentage must clamp to the stored maximum.
    let recorded = progress
        .record(task.id, "visual_analysis", step_status::RUNNING, 10, "late")
        .await
        .expect("record should succeed");
    assert_eq!(recorded, 25);

    let recorded = progress
        .record(task.id, "data_extraction", step_status::RUNNING, 50, "fields")
        .await
        .expect("record should succeed");
    assert_eq!(recorded, 50);

    let history = progress.history(task.id).await.expect("history should load");
    let percentages: Vec<i16> = history.iter().map(|e| e.progress_percentage).collect();
    let mut sorted = percentages.clone();
    sorted.sort_unstable();
    assert_eq!(percentages, sorted, "recorded percentages must not regress");
}

#[tokio::test]
#[ignore]
async fn test_phase_failure_leaves_no_later_events() {
    let store = test_store().await;
    let tasks = store.tasks();
    let progress = store.progress();

    let task = tasks
        .enqueue(NewTask::new(Uuid::new_v4(), "/mnt/uploads/halts.pdf"))
        .await
        .expect("enqueue should succeed");

    let mut found = false;
    for _ in 0..50 {
        match tasks.claim_next().await.expect("claim should succeed") {
            Some(t) if t.id == task.id => {
                found = true;
                break;
            }
            Some(_) => continue,
            None => break,
        }
    }
    assert!(found, "task should be claimable");

    // Pipeline reaches data_extraction, then the worker reports failure.
    progress
        .record(task.id, "visual_analysis", step_status::RUNNING, 0, "start")
        .await
        .expect("record should succeed");
    progress
        .record(task.id, "data_extraction", step_status::RUNNING, 25, "start")
        .await
        .expect("record should succeed");
    progress
        .record(
            task.id,
            "data_extraction",
            step_status::FAILED,
            25,
            "no extractable fields",
        )
        .await
        .expect("record should succeed");
    tasks
        .complete(task.id, &TaskOutcome::failed("data_extraction: no extractable fields"))
        .await
        .expect("complete should succeed");

    let snapshot = tasks
        .status_snapshot(task.document_id)
        .await
        .expect("snapshot should load")
        .expect("snapshot should exist");
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.current_step.as_deref(), Some("data_extraction"));
    assert!(snapshot.last_error.is_some());

    let history = progress.history(task.id).await.expect("history should load");
    assert!(history
        .iter()
        .all(|e| e.step_name != "template_processing" && e.step_name != "specialized_analysis"));
}

#[tokio::test]
#[ignore]
async fn test_phase_result_cache_upserts_and_clears() {
    let store = test_store().await;
    let results = store.results();

    let document_id = Uuid::new_v4();

    results
        .store_phase(document_id, "visual_analysis", &serde_json::json!({"pages": 3}))
        .await
        .expect("store should succeed");
    results
        .store_phase(document_id, "visual_analysis", &serde_json::json!({"pages": 5}))
        .await
        .expect("upsert should succeed");
    results
        .store_phase(document_id, "data_extraction", &serde_json::json!({"fields": 9}))
        .await
        .expect("store should succeed");

    // No duplicate rows per (document, phase); the payload is replaced.
    let cached = results
        .fetch_document(document_id)
        .await
        .expect("fetch should succeed");
    assert_eq!(cached.len(), 2);
    let visual = cached
        .iter()
        .find(|r| r.phase == "visual_analysis")
        .expect("visual payload should exist");
    assert_eq!(visual.payload["pages"], 5);

    let cleared = results
        .clear_document(document_id)
        .await
        .expect("clear should succeed");
    assert_eq!(cleared, 2);

    let cached = results
        .fetch_document(document_id)
        .await
        .expect("fetch should succeed");
    assert!(cached.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_requeue_document_elevates_priority() {
    let store = test_store().await;
    let tasks = store.tasks();

    let document_id = Uuid::new_v4();
    let task = tasks
        .enqueue(NewTask::new(document_id, "/mnt/uploads/requeue.pdf"))
        .await
        .expect("enqueue should succeed");

    let requeued = tasks
        .requeue_document(document_id, 10)
        .await
        .expect("requeue should succeed");

    assert_eq!(requeued.id, task.id);
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert_eq!(requeued.priority, 10);
    assert_eq!(requeued.retry_count, 1);
    assert!(requeued.last_error.is_none());

    let missing = tasks.requeue_document(Uuid::new_v4(), 10).await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}

#[tokio::test]
#[ignore]
async fn test_retry_failed_requeues_and_clears_error() {
    let store = test_store().await;
    let tasks = store.tasks();

    let task = tasks
        .enqueue(NewTask::new(Uuid::new_v4(), "/mnt/uploads/retry.pdf"))
        .await
        .expect("enqueue should succeed");

    let mut found = false;
    for _ in 0..50 {
        match tasks.claim_next().await.expect("claim should succeed") {
            Some(t) if t.id == task.id => {
                found = true;
                break;
            }
            Some(_) => continue,
            None => break,
        }
    }
    assert!(found, "task should be claimable");

    tasks
        .complete(task.id, &TaskOutcome::failed("worker exploded"))
        .await
        .expect("complete should succeed");

    let requeued = tasks.retry_failed().await.expect("retry should succeed");
    assert!(requeued >= 1);

    let repaired = tasks
        .get(task.id)
        .await
        .expect("get should succeed")
        .expect("task should exist");
    assert_eq!(repaired.status, TaskStatus::Pending);
    assert_eq!(repaired.retry_count, 1);
    assert!(repaired.last_error.is_none());
    assert!(repaired.started_at.is_none());
    assert!(repaired.completed_at.is_none());
}

#[tokio::test]
#[ignore]
async fn test_worker_registry_heartbeat_and_staleness() {
    let store = test_store().await;
    let servers = store.servers();

    let server_id = format!("gpu-test-{}", Uuid::new_v4());
    let worker = servers
        .heartbeat(&Heartbeat {
            server_id: server_id.clone(),
            server_type: "gpu".to_string(),
            endpoint_url: "http://gpu-test:9000".to_string(),
            current_load: 0,
            max_concurrent_tasks: 2,
        })
        .await
        .expect("heartbeat should succeed");
    assert!(worker.has_capacity());

    // A fresh heartbeat makes the worker eligible for dispatch.
    let picked = servers
        .pick_available(Duration::from_secs(3600))
        .await
        .expect("pick should succeed");
    assert!(picked.is_some());

    // Zero timeout ages every heartbeat out; the worker must be marked
    // and excluded afterwards.
    let marked = servers
        .mark_stale_unavailable(Duration::from_secs(0))
        .await
        .expect("mark should succeed");
    assert!(marked.contains(&server_id));

    let picked = servers
        .pick_available(Duration::from_secs(0))
        .await
        .expect("pick should succeed");
    assert!(picked.is_none());
}
