//! PostgreSQL implementation of the jobq storage engine.
//!
//! This is the hard part of the system: atomic claim-and-transition of jobs
//! under multi-worker contention, with a deterministic priority+schedule
//! ordering rule and a durable retry/DLQ state machine.
//!
//! # Atomic claim
//!
//! `claim` uses `FOR UPDATE SKIP LOCKED` inside a CTE: the `SELECT` that
//! decides the winner takes a row lock before any other transaction can
//! observe it, and concurrent claimants that would contend for the same
//! row skip past it to the next candidate instead of blocking. No two
//! concurrent callers can ever receive the same job, and non-claiming
//! reads (`list`, `stats`, `metrics_summary`) never take a row lock at all.
//!
//! # Database schema
//!
//! See `migrations/0001_init.sql`. Two tables: `jobs` (the entity + state
//! machine) and `metric_events` (the append-only transition log, no FK
//! cascade — events must outlive the row they describe).
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobq_storage::PgStorage;
//!
//! let storage = PgStorage::connect("postgres://localhost/jobq").await?;
//! let manager = jobq_core::QueueManager::new(Arc::new(storage), defaults);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobq_core::{
    Claimed, Job, JobQueueError, JobState, JobStats, JobStorage, MetricEvent, MetricsSummary,
    NewJob, Result,
};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};

/// PostgreSQL-backed [`JobStorage`].
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Connect and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| JobQueueError::Storage(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(PgStorage { pool })
    }

    /// Wrap an already-connected, already-migrated pool (used by tests that
    /// share one migrated database across many isolated schemas).
    pub fn from_pool(pool: PgPool) -> Self {
        PgStorage { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Distinguish "job doesn't exist" from "job exists but the mutation's
/// precondition wasn't met" after an `UPDATE ... WHERE state = ...` affected
/// zero rows, so callers get `NotFound` vs `InvalidTransition` per the
/// storage contract rather than collapsing both into one error.
async fn not_found_or_invalid_transition(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &str,
    what: &str,
) -> JobQueueError {
    let exists: sqlx::Result<Option<(String,)>> =
        sqlx::query_as("SELECT id FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await;
    match exists {
        Ok(None) => JobQueueError::not_found(id),
        Ok(Some(_)) => JobQueueError::invalid_transition(format!(
            "{what} failed for job {id}: precondition not met"
        )),
        Err(e) => JobQueueError::Storage(e),
    }
}

#[async_trait]
impl JobStorage for PgStorage {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert(&self, job: NewJob, max_retries: i32, priority: i16) -> Result<Job> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM jobs WHERE id = $1")
            .bind(&job.id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(JobQueueError::validation(format!(
                "job id {} already exists",
                job.id
            )));
        }

        let row: Job = sqlx::query_as(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, priority, run_at)
            VALUES ($1, $2, 'pending', 0, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(max_retries)
        .bind(priority)
        .bind(job.run_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO metric_events (job_id, event_type) VALUES ($1, 'enqueued')")
            .bind(&job.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(priority, max_retries, "job enqueued");
        Ok(row)
    }

    #[instrument(skip(self))]
    async fn claim(&self, now: DateTime<Utc>) -> Result<Claimed> {
        let mut tx = self.pool.begin().await?;

        let claimed: Option<Job> = sqlx::query_as(
            r#"
            WITH claimable AS (
                SELECT id
                FROM jobs
                WHERE state = 'pending'
                  AND (run_at IS NULL OR run_at <= $1)
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET state = 'processing',
                last_executed_at = $1,
                updated_at = $1
            WHERE id IN (SELECT id FROM claimable)
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = claimed else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("INSERT INTO metric_events (job_id, event_type) VALUES ($1, 'started')")
            .bind(&job.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(job_id = %job.id, priority = job.priority, "job claimed");
        Ok(Some(job))
    }

    #[instrument(skip(self))]
    async fn mark_completed(&self, id: &str, duration_ms: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', updated_at = NOW()
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(not_found_or_invalid_transition(&mut tx, id, "mark_completed").await);
        }

        sqlx::query(
            "INSERT INTO metric_events (job_id, event_type, duration_ms) VALUES ($1, 'completed', $2)",
        )
        .bind(id)
        .bind(duration_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn mark_pending(&self, id: &str, attempts: i32, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = $2,
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1 AND state = 'processing' AND $2 <= max_retries
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(not_found_or_invalid_transition(&mut tx, id, "mark_pending").await);
        }

        sqlx::query(
            "INSERT INTO metric_events (job_id, event_type, error_message) VALUES ($1, 'failed', $2)",
        )
        .bind(id)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn mark_dead(&self, id: &str, attempts: i32, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'dead',
                attempts = $2,
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(not_found_or_invalid_transition(&mut tx, id, "mark_dead").await);
        }

        sqlx::query(
            "INSERT INTO metric_events (job_id, event_type, error_message) VALUES ($1, 'failed', $2)",
        )
        .bind(id)
        .bind(error)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO metric_events (job_id, event_type, error_message) VALUES ($1, 'dlq', $2)",
        )
        .bind(id)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        warn!(job_id = %id, attempts, "job moved to dead letter queue");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn retry_dead(&self, id: &str) -> Result<Job> {
        let mut tx = self.pool.begin().await?;

        let row: Option<Job> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = 0, error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND state = 'dead'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = row else {
            return Err(not_found_or_invalid_transition(&mut tx, id, "retry_dead").await);
        };

        sqlx::query("INSERT INTO metric_events (job_id, event_type) VALUES ($1, 'enqueued')")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let jobs = match state {
            Some(state) => {
                sqlx::query_as("SELECT * FROM jobs WHERE state = $1 ORDER BY created_at ASC")
                    .bind(state)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM jobs ORDER BY created_at ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(jobs)
    }

    async fn stats(&self) -> Result<JobStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'pending')    AS pending,
                COUNT(*) FILTER (WHERE state = 'processing') AS processing,
                COUNT(*) FILTER (WHERE state = 'completed')  AS completed,
                COUNT(*) FILTER (WHERE state = 'failed')     AS failed,
                COUNT(*) FILTER (WHERE state = 'dead')       AS dead
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(JobStats {
            pending: row.get("pending"),
            processing: row.get("processing"),
            completed: row.get("completed"),
            failed: row.get("failed"),
            dead: row.get("dead"),
        })
    }

    async fn metrics_summary(&self, n: i64) -> Result<MetricsSummary> {
        let counts = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE event_type = 'enqueued')  AS enqueued,
                COUNT(*) FILTER (WHERE event_type = 'started')   AS started,
                COUNT(*) FILTER (WHERE event_type = 'completed') AS completed,
                COUNT(*) FILTER (WHERE event_type = 'failed')    AS failed,
                COUNT(*) FILTER (WHERE event_type = 'dlq')       AS dlq,
                AVG(duration_ms) FILTER (WHERE event_type = 'completed') AS mean_duration_ms
            FROM metric_events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let recent: Vec<MetricEvent> =
            sqlx::query_as("SELECT * FROM metric_events ORDER BY seq DESC LIMIT $1")
                .bind(n.max(0))
                .fetch_all(&self.pool)
                .await?;

        Ok(MetricsSummary {
            enqueued: counts.get("enqueued"),
            started: counts.get("started"),
            completed: counts.get("completed"),
            failed: counts.get("failed"),
            dlq: counts.get("dlq"),
            mean_completed_duration_ms: counts.get("mean_duration_ms"),
            recent,
        })
    }

    async fn get(&self, id: &str) -> Result<Job> {
        sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| JobQueueError::not_found(id))
    }
}

// Postgres-backed tests live under `tests/postgres.rs` (needs
// `JOBQ_TEST_DATABASE_URL`, run with `cargo test -- --ignored`).
