//! The persisted job entity and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a job currently sits in its lifecycle.
///
/// `Completed` and `Dead` are terminal: once reached, a job accepts no
/// further mutation. `Processing` means exactly one worker currently owns
/// the row; the storage engine is what enforces that, not this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    /// Terminal states accept no further transition or event.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

/// A durable unit of work: an opaque shell command plus its scheduling and
/// retry bookkeeping.
///
/// Rows are shared-immutable from the producer's perspective once enqueued;
/// ownership while `processing` belongs exclusively to whichever worker
/// claimed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: i32,
    pub max_retries: i32,
    pub priority: i16,
    pub run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A pending job is eligible for claim once its `run_at` (if any) has
    /// passed. Absent `run_at` means "eligible immediately".
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.run_at.map_or(true, |at| at <= now)
    }

    /// True once the next failure must route to the dead-letter queue
    /// instead of back to `pending`.
    pub fn exhausted(&self, attempts_after_failure: i32) -> bool {
        attempts_after_failure >= self.max_retries
    }
}

/// Input accepted at `insert` time; everything else is server-assigned.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub id: String,
    pub command: String,
    pub priority: Option<i16>,
    pub max_retries: Option<i32>,
    pub run_at: Option<DateTime<Utc>>,
}

pub const MIN_PRIORITY: i16 = 1;
pub const MAX_PRIORITY: i16 = 10;
pub const DEFAULT_PRIORITY: i16 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    fn job(state: JobState, run_at: Option<DateTime<Utc>>) -> Job {
        Job {
            id: "j1".into(),
            command: "true".into(),
            state,
            attempts: 0,
            max_retries: 3,
            priority: DEFAULT_PRIORITY,
            run_at,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            error_message: None,
            last_executed_at: None,
        }
    }

    #[test]
    fn pending_with_no_run_at_is_eligible_now() {
        assert!(job(JobState::Pending, None).is_eligible(Utc::now()));
    }

    #[test]
    fn pending_with_future_run_at_is_not_eligible() {
        let future = Utc::now() + chrono::Duration::seconds(60);
        assert!(!job(JobState::Pending, Some(future)).is_eligible(Utc::now()));
    }

    #[test]
    fn processing_job_is_never_eligible() {
        assert!(!job(JobState::Processing, None).is_eligible(Utc::now()));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Dead.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());
    }

    #[test]
    fn exhausted_at_max_retries() {
        let j = job(JobState::Processing, None);
        assert!(!j.exhausted(j.max_retries - 1));
        assert!(j.exhausted(j.max_retries));
    }
}
