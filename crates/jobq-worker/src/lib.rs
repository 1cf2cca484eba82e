//! The worker pool: spawns `count` independent workers that each run the
//! claim → execute → transition loop, publish heartbeats, and honor a
//! cooperative shutdown signal.
//!
//! # Process vs. task isolation
//!
//! The distilled design runs each worker as a true OS process so a
//! crashing job can never take down the pool. Here each worker is a
//! `tokio` task instead — cheaper to schedule, and still safe, because the
//! thing that actually needs process isolation (a job's shell command) runs
//! in a real child process via [`jobq_executor::Executor`]. A panic inside
//! the executor's own async plumbing would still be a bug in this crate,
//! not in a job's command.
//!
//! # Pluggable command runner
//!
//! `WorkerPool` is generic over [`CommandRunner`], defaulting to
//! [`Executor`]. Tests that want deterministic timing without spawning real
//! subprocesses construct a pool with [`WorkerPool::with_executor`] and a
//! scripted double (`jobq-testing::FakeExecutor`) instead.
//!
//! # Heartbeats
//!
//! Each worker writes `{last_heartbeat, jobs_processed}` into a shared
//! [`dashmap::DashMap`] on every loop iteration, whether it found a job or
//! not. [`WorkerPool::health`] reports a worker alive iff its last
//! heartbeat is under 60 seconds old.
//!
//! # Graceful shutdown
//!
//! [`WorkerPool::shutdown`] flips a [`tokio_util::sync::CancellationToken`]
//! and waits up to 30 seconds for every worker task to return on its own.
//! Workers check the token between jobs and during backoff/poll sleeps
//! (both are `tokio::select!`-raced against cancellation, so neither delays
//! shutdown by its full duration). A worker that is mid-`execute` is never
//! preempted — it runs out its current subprocess, bounded by
//! `job_timeout`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jobq_core::{JobStorage, QueueManager};
use jobq_executor::{CommandRunner, Executor};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const HEARTBEAT_ALIVE_WINDOW: Duration = Duration::from_secs(60);

/// Runtime settings a worker pool snapshots once at startup. Later
/// `config set` calls do not propagate to an already-running pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub backoff_base: f64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct Heartbeat {
    pub last_heartbeat: DateTime<Utc>,
    pub jobs_processed: u64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct WorkerHealth {
    pub worker_id: u32,
    pub alive: bool,
    pub jobs_processed: u64,
}

pub struct WorkerPool<S: JobStorage, E: CommandRunner = Executor> {
    manager: Arc<QueueManager<S>>,
    executor: Arc<E>,
    settings: WorkerSettings,
    heartbeats: Arc<DashMap<u32, Heartbeat>>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl<S: JobStorage, E: CommandRunner + Default> WorkerPool<S, E> {
    pub fn new(manager: Arc<QueueManager<S>>, settings: WorkerSettings) -> Self {
        WorkerPool::with_executor(manager, settings, Arc::new(E::default()))
    }
}

impl<S: JobStorage, E: CommandRunner> WorkerPool<S, E> {
    /// Build a pool around an explicit command runner, e.g. a scripted
    /// double in tests.
    pub fn with_executor(manager: Arc<QueueManager<S>>, settings: WorkerSettings, executor: Arc<E>) -> Self {
        WorkerPool {
            manager,
            executor,
            settings,
            heartbeats: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Spawn `count` worker tasks. Returns immediately; the pool runs in
    /// the background until [`WorkerPool::shutdown`] is called or the
    /// process exits.
    pub fn spawn(&mut self, count: u32) {
        for worker_id in 0..count {
            let manager = self.manager.clone();
            let executor = self.executor.clone();
            let settings = self.settings;
            let heartbeats = self.heartbeats.clone();
            let cancel = self.cancel.clone();

            heartbeats.insert(
                worker_id,
                Heartbeat {
                    last_heartbeat: Utc::now(),
                    jobs_processed: 0,
                },
            );

            let handle = tokio::spawn(worker_loop(
                worker_id, manager, executor, settings, heartbeats, cancel,
            ));
            self.handles.push(handle);
        }
        info!(count, "worker pool started");
    }

    /// Current per-worker health as of the last heartbeat.
    pub fn health(&self) -> Vec<WorkerHealth> {
        let now = Utc::now();
        let mut out: Vec<WorkerHealth> = self
            .heartbeats
            .iter()
            .map(|entry| {
                let age = now.signed_duration_since(entry.last_heartbeat);
                let alive = age.to_std().map(|d| d < HEARTBEAT_ALIVE_WINDOW).unwrap_or(false);
                WorkerHealth {
                    worker_id: *entry.key(),
                    alive,
                    jobs_processed: entry.jobs_processed,
                }
            })
            .collect();
        out.sort_by_key(|h| h.worker_id);
        out
    }

    /// Signal shutdown and wait up to 30s for workers to exit voluntarily;
    /// anything still running past the grace period is aborted.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let joins = std::mem::take(&mut self.handles);
        let all = futures_join_all(joins);
        if tokio::time::timeout(SHUTDOWN_GRACE, all).await.is_err() {
            warn!("graceful shutdown window elapsed; aborting remaining workers");
        }
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!("worker task panicked: {e}");
            }
        }
    }
}

#[instrument(skip_all, fields(worker_id))]
async fn worker_loop<S: JobStorage, E: CommandRunner>(
    worker_id: u32,
    manager: Arc<QueueManager<S>>,
    executor: Arc<E>,
    settings: WorkerSettings,
    heartbeats: Arc<DashMap<u32, Heartbeat>>,
    cancel: CancellationToken,
) {
    let mut jobs_processed: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            info!(worker_id, jobs_processed, "worker shutting down");
            return;
        }

        heartbeats.insert(
            worker_id,
            Heartbeat {
                last_heartbeat: Utc::now(),
                jobs_processed,
            },
        );

        let claimed = match manager.claim().await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(worker_id, error = %e, "claim failed, will retry after poll interval");
                if interruptible_sleep(settings.poll_interval, &cancel).await {
                    return;
                }
                continue;
            }
        };

        let Some(job) = claimed else {
            if interruptible_sleep(settings.poll_interval, &cancel).await {
                return;
            }
            continue;
        };

        let outcome = executor.execute(&job.command, settings.job_timeout).await;

        if outcome.success {
            if let Err(e) = manager.mark_completed(&job.id, outcome.duration_ms as i64).await {
                error!(worker_id, job_id = %job.id, error = %e, "failed to record completion");
            } else {
                jobs_processed += 1;
            }
            continue;
        }

        let next_attempt = job.attempts + 1;
        if next_attempt < job.max_retries {
            let backoff = settings.backoff_base.powi(next_attempt);
            let backoff = Duration::from_secs_f64(backoff.max(0.0));
            if interruptible_sleep(backoff, &cancel).await {
                return;
            }
            if let Err(e) = manager
                .mark_pending(&job.id, next_attempt, &outcome.error)
                .await
            {
                error!(worker_id, job_id = %job.id, error = %e, "failed to requeue after failure");
            }
        } else if let Err(e) = manager
            .mark_dead(&job.id, next_attempt, &outcome.error)
            .await
        {
            error!(worker_id, job_id = %job.id, error = %e, "failed to dead-letter job");
        }
    }
}

/// Sleeps `duration` unless `cancel` fires first. Returns `true` if
/// cancellation won the race (caller should exit its loop).
async fn interruptible_sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel.cancelled() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobq_core::testing::MemoryStorage;
    use jobq_core::{ManagerDefaults, NewJob};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn priority_overrides_fifo() {
        let manager = Arc::new(QueueManager::new(
            Arc::new(MemoryStorage::new()),
            ManagerDefaults::default(),
        ));
        manager
            .enqueue(NewJob {
                id: "low".into(),
                command: "true".into(),
                priority: Some(1),
                max_retries: None,
                run_at: None,
            })
            .await
            .unwrap();
        manager
            .enqueue(NewJob {
                id: "high".into(),
                command: "true".into(),
                priority: Some(10),
                max_retries: None,
                run_at: None,
            })
            .await
            .unwrap();

        let first = manager.claim().await.unwrap().unwrap();
        assert_eq!(first.id, "high");
        let second = manager.claim().await.unwrap().unwrap();
        assert_eq!(second.id, "low");
    }

    #[test]
    fn health_reports_alive_within_window() {
        let heartbeats: DashMap<u32, Heartbeat> = DashMap::new();
        heartbeats.insert(
            0,
            Heartbeat {
                last_heartbeat: Utc::now(),
                jobs_processed: 3,
            },
        );
        let now = Utc::now();
        let entry = heartbeats.get(&0).unwrap();
        let age = now.signed_duration_since(entry.last_heartbeat);
        assert!(age.to_std().unwrap() < HEARTBEAT_ALIVE_WINDOW);
    }
}
