//! End-to-end `WorkerPool` tests: claim -> execute -> transition, driven
//! through a real pool instead of poking `QueueManager` directly.

use std::sync::Arc;
use std::time::Duration;

use jobq_core::testing::MemoryStorage;
use jobq_core::{JobState, ManagerDefaults, QueueManager};
use jobq_testing::{always_fails, FakeExecutor, JobBuilder, ALWAYS_SUCCEEDS};
use jobq_worker::{WorkerPool, WorkerSettings};

fn fast_settings() -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(10),
        job_timeout: Duration::from_secs(5),
        backoff_base: 1.0,
    }
}

/// Polls `manager.get(id)` until it reaches `want`, or panics after 2s.
async fn wait_for_state(manager: &QueueManager<MemoryStorage>, id: &str, want: JobState) {
    for _ in 0..200 {
        if let Ok(job) = manager.get(id).await {
            if job.state == want {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not reach {want:?} in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_worker_completes_a_job() {
    let manager = Arc::new(QueueManager::new(
        Arc::new(MemoryStorage::new()),
        ManagerDefaults::default(),
    ));
    manager
        .enqueue(JobBuilder::new("ok-1").command(ALWAYS_SUCCEEDS).build())
        .await
        .unwrap();

    let mut pool: WorkerPool<MemoryStorage, jobq_executor::Executor> = WorkerPool::new(manager.clone(), fast_settings());
    pool.spawn(1);

    wait_for_state(&manager, "ok-1", JobState::Completed).await;

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_retries_reach_dead_letter() {
    let manager = Arc::new(QueueManager::new(
        Arc::new(MemoryStorage::new()),
        ManagerDefaults::default(),
    ));
    manager
        .enqueue(
            JobBuilder::new("doomed")
                .command(always_fails("nope"))
                .max_retries(2)
                .build(),
        )
        .await
        .unwrap();

    let mut pool: WorkerPool<MemoryStorage, jobq_executor::Executor> = WorkerPool::new(manager.clone(), fast_settings());
    pool.spawn(1);

    wait_for_state(&manager, "doomed", JobState::Dead).await;

    let job = manager.get("doomed").await.unwrap();
    assert_eq!(job.attempts, 3);

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retries_then_succeeds_with_a_scripted_executor() {
    let manager = Arc::new(QueueManager::new(
        Arc::new(MemoryStorage::new()),
        ManagerDefaults::default(),
    ));
    let command = "flaky-job";
    manager
        .enqueue(
            JobBuilder::new("flaky")
                .command(command)
                .max_retries(5)
                .build(),
        )
        .await
        .unwrap();

    let executor = Arc::new(FakeExecutor::new());
    executor.script_failure(command, "boom 1");
    executor.script_failure(command, "boom 2");
    executor.script_success(command);

    let mut pool = WorkerPool::with_executor(manager.clone(), fast_settings(), executor);
    pool.spawn(1);

    wait_for_state(&manager, "flaky", JobState::Completed).await;

    let job = manager.get("flaky").await.unwrap();
    assert_eq!(job.attempts, 3);

    pool.shutdown().await;
}
