//! The error taxonomy shared by the storage engine, the queue manager, and
//! every external interface (CLI, dashboard) built on top of them.
//!
//! Variants are grouped by *kind*, not by which layer raised them — a
//! `NotFound` from the storage engine and a `NotFound` surfaced by the CLI
//! are the same variant, matching the "by kind, not type" taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobQueueError {
    /// Bad input at the boundary: missing id, priority out of range,
    /// malformed `run_at`, empty command. No state change occurs.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced job id does not exist.
    #[error("job not found: {0}")]
    NotFound(String),

    /// The operation is incompatible with the job's current state, e.g.
    /// retrying a job that isn't dead, or claiming a job already claimed.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The underlying durable store failed (I/O, lock timeout exceeded).
    /// Claim conflicts are retried internally and never surface here; this
    /// variant is for persistent failures.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, JobQueueError>;

impl JobQueueError {
    pub fn validation(msg: impl Into<String>) -> Self {
        JobQueueError::Validation(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        JobQueueError::NotFound(id.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        JobQueueError::InvalidTransition(msg.into())
    }
}
