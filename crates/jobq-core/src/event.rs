//! The append-only metric event log.
//!
//! Every committed state transition writes exactly one event here (two for
//! the dead-letter transition — see [`EventType::Dlq`]). Events are never
//! updated or deleted; they exist purely for observability and for tests
//! that assert a job's transition history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "metric_event_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Enqueued,
    Started,
    Completed,
    Failed,
    /// Emitted in addition to (not instead of) `Failed` when a job's last
    /// attempt routes it to the dead-letter queue.
    Dlq,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MetricEvent {
    pub seq: i64,
    pub job_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

/// Aggregate view returned by `metrics_summary`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsSummary {
    pub enqueued: i64,
    pub started: i64,
    pub completed: i64,
    pub failed: i64,
    pub dlq: i64,
    pub mean_completed_duration_ms: Option<f64>,
    pub recent: Vec<MetricEvent>,
}
