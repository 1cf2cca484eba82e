//! Integration tests against a real Postgres instance. Each test gets its
//! own schema via `jobq_testing::TestDb` so they can run concurrently
//! without stepping on each other's rows.
//!
//! Requires `JOBQ_TEST_DATABASE_URL`; marked `#[ignore]` so `cargo test`
//! stays offline by default. Run with `cargo test -- --ignored`.

use std::collections::HashSet;
use std::sync::Arc;

use jobq_core::{JobQueueError, NewJob, QueueManager};
use jobq_testing::TestDb;

fn new_job(id: &str) -> NewJob {
    NewJob {
        id: id.into(),
        command: "true".into(),
        priority: None,
        max_retries: None,
        run_at: None,
    }
}

#[tokio::test]
#[ignore]
async fn claim_never_returns_duplicate_under_contention() {
    let db = TestDb::connect().await;
    let storage = Arc::new(db.storage());
    let manager = QueueManager::new(storage.clone(), Default::default());
    for i in 0..20 {
        manager
            .enqueue(new_job(&format!("dup-{i}")))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..10 {
        let m = manager.clone();
        handles.push(tokio::spawn(async move { m.claim().await.unwrap() }));
    }
    let mut seen = HashSet::new();
    for h in handles {
        if let Some(job) = h.await.unwrap() {
            assert!(seen.insert(job.id), "duplicate claim observed");
        }
    }

    db.teardown().await;
}

#[tokio::test]
#[ignore]
async fn retry_dead_is_not_idempotent() {
    let db = TestDb::connect().await;
    let manager = QueueManager::new(Arc::new(db.storage()), Default::default());
    let mut job = new_job("rd-1");
    job.max_retries = Some(1);
    manager.enqueue(job).await.unwrap();
    let claimed = manager.claim().await.unwrap().unwrap();
    manager.mark_dead(&claimed.id, 1, "boom").await.unwrap();

    manager.retry_dead(&claimed.id).await.unwrap();
    let err = manager.retry_dead(&claimed.id).await.unwrap_err();
    assert!(matches!(err, JobQueueError::InvalidTransition(_)));

    db.teardown().await;
}

#[tokio::test]
#[ignore]
async fn mutating_an_unknown_id_is_not_found_not_invalid_transition() {
    let db = TestDb::connect().await;
    let storage = db.storage();
    let manager = QueueManager::new(Arc::new(storage), Default::default());

    let err = manager
        .mark_completed("does-not-exist", 10)
        .await
        .unwrap_err();
    assert!(matches!(err, JobQueueError::NotFound(_)), "{err:?}");

    let err = manager
        .mark_pending("does-not-exist", 1, "boom")
        .await
        .unwrap_err();
    assert!(matches!(err, JobQueueError::NotFound(_)), "{err:?}");

    let err = manager
        .mark_dead("does-not-exist", 1, "boom")
        .await
        .unwrap_err();
    assert!(matches!(err, JobQueueError::NotFound(_)), "{err:?}");

    db.teardown().await;
}

#[tokio::test]
#[ignore]
async fn completing_a_pending_job_is_invalid_transition_not_not_found() {
    let db = TestDb::connect().await;
    let storage = db.storage();
    let manager = QueueManager::new(Arc::new(storage), Default::default());

    manager.enqueue(new_job("never-claimed")).await.unwrap();
    let err = manager
        .mark_completed("never-claimed", 10)
        .await
        .unwrap_err();
    assert!(matches!(err, JobQueueError::InvalidTransition(_)), "{err:?}");

    db.teardown().await;
}
