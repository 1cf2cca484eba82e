//! An in-process fake of [`JobStorage`] for fast unit tests that shouldn't
//! need a database. Exposed behind the `test-support` feature so
//! `jobq-testing` (and other crates' test suites) can depend on it without
//! pulling a full `sqlx`/Postgres stack into unit-test compiles.
//!
//! This is intentionally a straightforward single-mutex store: it exists to
//! exercise [`QueueManager`](crate::manager::QueueManager) logic in
//! isolation, not to model real concurrency. Claim correctness under
//! contention is `jobq-storage`'s job and is tested there against a real
//! Postgres instance.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{JobQueueError, Result};
use crate::event::{EventType, MetricEvent, MetricsSummary};
use crate::job::{Job, JobState, NewJob};
use crate::storage::{Claimed, JobStats, JobStorage};

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<String, Job>,
    events: Vec<MetricEvent>,
    seq: i64,
}

impl Inner {
    fn push_event(&mut self, job_id: &str, event_type: EventType, duration_ms: Option<i64>, error_message: Option<String>) {
        self.seq += 1;
        self.events.push(MetricEvent {
            seq: self.seq,
            job_id: job_id.to_string(),
            event_type,
            timestamp: Utc::now(),
            duration_ms,
            error_message,
        });
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStorage for MemoryStorage {
    async fn insert(&self, job: NewJob, max_retries: i32, priority: i16) -> Result<Job> {
        let mut inner = self.inner.lock().unwrap();
        if inner.jobs.contains_key(&job.id) {
            return Err(JobQueueError::validation(format!(
                "job id {} already exists",
                job.id
            )));
        }
        let now = Utc::now();
        let stored = Job {
            id: job.id.clone(),
            command: job.command,
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            priority,
            run_at: job.run_at,
            created_at: now,
            updated_at: now,
            error_message: None,
            last_executed_at: None,
        };
        inner.jobs.insert(job.id.clone(), stored.clone());
        inner.push_event(&job.id, EventType::Enqueued, None, None);
        Ok(stored)
    }

    async fn claim(&self, now: DateTime<Utc>) -> Result<Claimed> {
        let mut inner = self.inner.lock().unwrap();
        let winner_id = inner
            .jobs
            .values()
            .filter(|j| j.is_eligible(now))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.created_at.cmp(&a.created_at))
            })
            .map(|j| j.id.clone());

        let Some(id) = winner_id else {
            return Ok(None);
        };
        let job = inner.jobs.get_mut(&id).unwrap();
        job.state = JobState::Processing;
        job.last_executed_at = Some(now);
        job.updated_at = now;
        let snapshot = job.clone();
        inner.push_event(&id, EventType::Started, None, None);
        Ok(Some(snapshot))
    }

    async fn mark_completed(&self, id: &str, duration_ms: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobQueueError::not_found(id))?;
        if job.state != JobState::Processing {
            return Err(JobQueueError::invalid_transition(format!(
                "cannot complete job {id} in state {:?}",
                job.state
            )));
        }
        job.state = JobState::Completed;
        job.updated_at = Utc::now();
        inner.push_event(id, EventType::Completed, Some(duration_ms), None);
        Ok(())
    }

    async fn mark_pending(&self, id: &str, attempts: i32, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobQueueError::not_found(id))?;
        if job.state != JobState::Processing {
            return Err(JobQueueError::invalid_transition(format!(
                "cannot re-queue job {id} in state {:?}",
                job.state
            )));
        }
        if attempts > job.max_retries {
            return Err(JobQueueError::invalid_transition(format!(
                "job {id} attempts {attempts} exceeds max_retries {}",
                job.max_retries
            )));
        }
        job.state = JobState::Pending;
        job.attempts = attempts;
        job.error_message = Some(error.to_string());
        job.updated_at = Utc::now();
        inner.push_event(id, EventType::Failed, None, Some(error.to_string()));
        Ok(())
    }

    async fn mark_dead(&self, id: &str, attempts: i32, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobQueueError::not_found(id))?;
        if job.state != JobState::Processing {
            return Err(JobQueueError::invalid_transition(format!(
                "cannot dead-letter job {id} in state {:?}",
                job.state
            )));
        }
        job.state = JobState::Dead;
        job.attempts = attempts;
        job.error_message = Some(error.to_string());
        job.updated_at = Utc::now();
        inner.push_event(id, EventType::Failed, None, Some(error.to_string()));
        inner.push_event(id, EventType::Dlq, None, Some(error.to_string()));
        Ok(())
    }

    async fn retry_dead(&self, id: &str) -> Result<Job> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobQueueError::not_found(id))?;
        if job.state != JobState::Dead {
            return Err(JobQueueError::invalid_transition(format!(
                "cannot retry job {id} in state {:?}, expected dead",
                job.state
            )));
        }
        job.state = JobState::Pending;
        job.attempts = 0;
        job.error_message = None;
        job.updated_at = Utc::now();
        let snapshot = job.clone();
        inner.push_event(id, EventType::Enqueued, None, None);
        Ok(snapshot)
    }

    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let inner = self.inner.lock().unwrap();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| state.map_or(true, |s| j.state == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn stats(&self) -> Result<JobStats> {
        let inner = self.inner.lock().unwrap();
        let mut stats = JobStats::default();
        for job in inner.jobs.values() {
            match job.state {
                JobState::Pending => stats.pending += 1,
                JobState::Processing => stats.processing += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Dead => stats.dead += 1,
            }
        }
        Ok(stats)
    }

    async fn metrics_summary(&self, n: i64) -> Result<MetricsSummary> {
        let inner = self.inner.lock().unwrap();
        let mut summary = MetricsSummary::default();
        let mut durations = Vec::new();
        for event in &inner.events {
            match event.event_type {
                EventType::Enqueued => summary.enqueued += 1,
                EventType::Started => summary.started += 1,
                EventType::Completed => {
                    summary.completed += 1;
                    if let Some(d) = event.duration_ms {
                        durations.push(d as f64);
                    }
                }
                EventType::Failed => summary.failed += 1,
                EventType::Dlq => summary.dlq += 1,
            }
        }
        if !durations.is_empty() {
            summary.mean_completed_duration_ms =
                Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        let n = n.max(0) as usize;
        summary.recent = inner
            .events
            .iter()
            .rev()
            .take(n)
            .cloned()
            .collect();
        Ok(summary)
    }

    async fn get(&self, id: &str) -> Result<Job> {
        let inner = self.inner.lock().unwrap();
        inner
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| JobQueueError::not_found(id))
    }
}
