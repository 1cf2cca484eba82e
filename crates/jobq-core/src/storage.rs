//! The storage engine contract.
//!
//! `JobStorage` is the seam between the queue manager and whatever durable
//! backend actually holds jobs and events. `jobq-storage::PgStorage` is the
//! production implementation (PostgreSQL, `FOR UPDATE SKIP LOCKED`);
//! `jobq-testing::MemoryStorage` is an in-process fake used by unit tests
//! that don't want a database.
//!
//! Every method here is transactional: a call either commits its state
//! change and its event atomically, or changes nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::MetricsSummary;
use crate::job::{Job, JobState, NewJob};

/// Snapshot returned by `claim`: the job as it now stands (`state =
/// processing`, `last_executed_at` set), or `None` if nothing was eligible.
pub type Claimed = Option<Job>;

#[async_trait]
pub trait JobStorage: Send + Sync + 'static {
    /// Insert a new pending job. Fails with `Validation` if `id` already
    /// exists or `priority` is out of `[1, 10]`.
    async fn insert(&self, job: NewJob, max_retries: i32, priority: i16) -> Result<Job>;

    /// Atomically select the single highest-priority eligible job
    /// (`priority DESC, created_at ASC`, ties broken by insertion order)
    /// and transition it to `processing`. Never returns the same row to two
    /// concurrent callers.
    async fn claim(&self, now: DateTime<Utc>) -> Result<Claimed>;

    /// `processing -> completed`. Fails with `InvalidTransition` unless the
    /// job is currently `processing`.
    async fn mark_completed(&self, id: &str, duration_ms: i64) -> Result<()>;

    /// `processing -> pending` with `attempts` bumped and the failure
    /// recorded. Fails with `InvalidTransition` if the job isn't
    /// `processing` or `attempts` would exceed `max_retries`.
    async fn mark_pending(&self, id: &str, attempts: i32, error: &str) -> Result<()>;

    /// `processing -> dead`. Writes both a `failed` and a `dlq` event.
    async fn mark_dead(&self, id: &str, attempts: i32, error: &str) -> Result<()>;

    /// `dead -> pending`, resetting `attempts` to zero and clearing the
    /// error. Fails with `InvalidTransition` unless the job is `dead`.
    async fn retry_dead(&self, id: &str) -> Result<Job>;

    /// Snapshot list, ordered by `created_at`. `None` means "all states".
    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>>;

    /// Counts grouped by state.
    async fn stats(&self) -> Result<JobStats>;

    /// Event counts per type, mean duration over `completed` events, and
    /// the last `n` events (most recent first).
    async fn metrics_summary(&self, n: i64) -> Result<MetricsSummary>;

    /// Fetch a single job by id, for CLI/dashboard lookups that don't go
    /// through `list`.
    async fn get(&self, id: &str) -> Result<Job>;
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct JobStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead: i64,
}
