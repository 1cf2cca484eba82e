//! The queue manager: a thin facade in front of [`JobStorage`].
//!
//! `QueueManager` fills in defaults from [`Config`](crate::config::ManagerDefaults),
//! validates caller input, and delegates every mutation to the storage
//! engine. It never bypasses the storage engine's transactional boundary —
//! each public method here is exactly one storage call.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::error::{JobQueueError, Result};
use crate::event::MetricsSummary;
use crate::job::{Job, JobState, NewJob, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};
use crate::storage::{Claimed, JobStats, JobStorage};

/// Defaults the manager applies when a caller omits a field.
#[derive(Debug, Clone, Copy)]
pub struct ManagerDefaults {
    pub max_retries: i32,
}

impl Default for ManagerDefaults {
    fn default() -> Self {
        ManagerDefaults { max_retries: 3 }
    }
}

#[derive(Clone)]
pub struct QueueManager<S: JobStorage> {
    storage: Arc<S>,
    defaults: ManagerDefaults,
}

impl<S: JobStorage> QueueManager<S> {
    pub fn new(storage: Arc<S>, defaults: ManagerDefaults) -> Self {
        QueueManager { storage, defaults }
    }

    /// Validate and insert a new job, defaulting `priority` to 5 and
    /// `max_retries` to the configured default when the caller omits them.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn enqueue(&self, job: NewJob) -> Result<Job> {
        if job.id.trim().is_empty() {
            return Err(JobQueueError::validation("id must not be empty"));
        }
        if job.command.trim().is_empty() {
            return Err(JobQueueError::validation("command must not be empty"));
        }
        let priority = job.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(JobQueueError::validation(format!(
                "priority must be in [{MIN_PRIORITY}, {MAX_PRIORITY}], got {priority}"
            )));
        }
        let max_retries = job.max_retries.unwrap_or(self.defaults.max_retries);
        if max_retries < 1 {
            return Err(JobQueueError::validation("max_retries must be positive"));
        }
        debug!(priority, max_retries, "enqueueing job");
        self.storage.insert(job, max_retries, priority).await
    }

    /// Atomically claim the next eligible job, if any.
    pub async fn claim(&self) -> Result<Claimed> {
        self.storage.claim(Utc::now()).await
    }

    pub async fn mark_completed(&self, id: &str, duration_ms: i64) -> Result<()> {
        self.storage.mark_completed(id, duration_ms).await
    }

    pub async fn mark_pending(&self, id: &str, attempts: i32, error: &str) -> Result<()> {
        self.storage.mark_pending(id, attempts, error).await
    }

    pub async fn mark_dead(&self, id: &str, attempts: i32, error: &str) -> Result<()> {
        self.storage.mark_dead(id, attempts, error).await
    }

    pub async fn retry_dead(&self, id: &str) -> Result<Job> {
        self.storage.retry_dead(id).await
    }

    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        self.storage.list(state).await
    }

    pub async fn stats(&self) -> Result<JobStats> {
        self.storage.stats().await
    }

    pub async fn metrics_summary(&self, n: i64) -> Result<MetricsSummary> {
        self.storage.metrics_summary(n).await
    }

    pub async fn get(&self, id: &str) -> Result<Job> {
        self.storage.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStorage;

    fn manager() -> QueueManager<MemoryStorage> {
        QueueManager::new(Arc::new(MemoryStorage::new()), ManagerDefaults::default())
    }

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
    async fn enqueue_rejects_empty_id() {
        let m = manager();
        let mut j = new_job("");
        j.id = "".into();
        let err = m.enqueue(j).await.unwrap_err();
        assert!(matches!(err, JobQueueError::Validation(_)));
    }

    #[tokio::test]
    async fn enqueue_rejects_out_of_range_priority() {
        let m = manager();
        let mut j = new_job("a");
        j.priority = Some(11);
        let err = m.enqueue(j).await.unwrap_err();
        assert!(matches!(err, JobQueueError::Validation(_)));
    }

    #[tokio::test]
    async fn enqueue_fills_defaults() {
        let m = manager();
        let job = m.enqueue(new_job("a")).await.unwrap();
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn round_trip_enqueue_then_list() {
        let m = manager();
        let inserted = m.enqueue(new_job("a")).await.unwrap();
        let listed = m.list(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, inserted.id);
        assert_eq!(listed[0].command, inserted.command);
    }

    #[tokio::test]
    async fn claim_then_complete() {
        let m = manager();
        m.enqueue(new_job("a")).await.unwrap();
        let claimed = m.claim().await.unwrap().expect("job available");
        assert_eq!(claimed.state, JobState::Processing);
        m.mark_completed(&claimed.id, 42).await.unwrap();
        let stats = m.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn idempotent_retry_dead_fails_second_time() {
        let m = manager();
        let mut j = new_job("a");
        j.max_retries = Some(1);
        m.enqueue(j).await.unwrap();
        let claimed = m.claim().await.unwrap().unwrap();
        m.mark_dead(&claimed.id, 1, "boom").await.unwrap();

        let retried = m.retry_dead(&claimed.id).await.unwrap();
        assert_eq!(retried.state, JobState::Pending);
        assert_eq!(retried.attempts, 0);

        let err = m.retry_dead(&claimed.id).await.unwrap_err();
        assert!(matches!(err, JobQueueError::InvalidTransition(_)));
    }
}
