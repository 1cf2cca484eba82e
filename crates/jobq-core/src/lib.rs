//! # jobq-core
//!
//! The persisted job model, its state machine, the storage-engine contract,
//! and the queue manager facade that sits in front of it.
//!
//! ## Architecture
//!
//! ```text
//! CLI / Dashboard
//!       │
//!       ▼ enqueue() / claim() / mark_*()
//! QueueManager ──────────────► JobStorage (trait)
//!       │                           │
//!       │                           ├─ jobq-storage::PgStorage (production)
//!       │                           └─ jobq-core::testing::MemoryStorage (tests)
//!       ▼
//!  one event per transition
//! ```
//!
//! ## Key invariants
//!
//! 1. `completed` and `dead` are terminal — no further mutation or event.
//! 2. `processing` has exactly one owner; only the storage engine's atomic
//!    claim can create that state.
//! 3. `attempts` never exceeds `max_retries + 1`; the next failure after
//!    `max_retries` routes to `dead`, never back to `pending`.
//! 4. Every committed transition writes exactly one event (two for the
//!    final transition into `dead`: `failed` then `dlq`).
//!
//! This crate defines the contract; `jobq-storage` is the production
//! implementation backed by PostgreSQL.
//!
//! ## What this is not
//!
//! - Not a distributed queue: there is exactly one durable store, and
//!   claims are linearizable against it, not across machines.
//! - Not exactly-once: claim is at-most-once, the side effect it guards is
//!   not.

mod error;
mod event;
mod job;
mod manager;
mod storage;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{JobQueueError, Result};
pub use event::{EventType, MetricEvent, MetricsSummary};
pub use job::{Job, JobState, NewJob, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};
pub use manager::{ManagerDefaults, QueueManager};
pub use storage::{Claimed, JobStats, JobStorage};

pub use async_trait::async_trait;
