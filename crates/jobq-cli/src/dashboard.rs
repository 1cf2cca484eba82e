//! Read-mostly JSON HTTP surface over the queue manager.
//!
//! No HTML, no templates, no static assets — callers get exactly the five
//! routes below and nothing else. Binds to loopback by default;
//! authentication is left to whatever sits in front of this in production.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jobq_core::{JobState, MetricsSummary, NewJob, QueueManager};
use jobq_storage::PgStorage;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

type SharedManager = Arc<QueueManager<PgStorage>>;

pub fn router(manager: SharedManager) -> Router {
    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/jobs", get(get_jobs))
        .route("/api/metrics", get(get_metrics))
        .route("/api/enqueue", post(post_enqueue))
        .route("/api/retry/:id", post(post_retry))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Serve the dashboard on `addr` until the future is dropped or the process
/// is signalled. Callers own shutdown; this just binds and serves.
pub async fn serve(manager: SharedManager, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = router(manager);
    info!(%addr, "dashboard listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

struct ApiError(jobq_core::JobQueueError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            jobq_core::JobQueueError::Validation(_) => StatusCode::BAD_REQUEST,
            jobq_core::JobQueueError::NotFound(_) => StatusCode::NOT_FOUND,
            jobq_core::JobQueueError::InvalidTransition(_) => StatusCode::CONFLICT,
            jobq_core::JobQueueError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<jobq_core::JobQueueError> for ApiError {
    fn from(e: jobq_core::JobQueueError) -> Self {
        ApiError(e)
    }
}

async fn get_stats(State(manager): State<SharedManager>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(manager.stats().await?))
}

#[derive(Deserialize)]
struct JobsQuery {
    state: Option<JobState>,
}

async fn get_jobs(
    State(manager): State<SharedManager>,
    Query(query): Query<JobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(manager.list(query.state).await?))
}

#[derive(Deserialize)]
struct MetricsQuery {
    recent: Option<i64>,
}

/// Per-event-type counts, nested under a `counts` key in the public API
/// response so the shape matches the documented dashboard contract
/// instead of `MetricsSummary`'s flat internal layout.
#[derive(Serialize)]
struct MetricsCounts {
    enqueued: i64,
    started: i64,
    completed: i64,
    failed: i64,
    dlq: i64,
}

#[derive(Serialize)]
struct MetricsResponse {
    counts: MetricsCounts,
    avg_duration_ms: Option<f64>,
    recent: Vec<jobq_core::MetricEvent>,
}

impl From<MetricsSummary> for MetricsResponse {
    fn from(summary: MetricsSummary) -> Self {
        MetricsResponse {
            counts: MetricsCounts {
                enqueued: summary.enqueued,
                started: summary.started,
                completed: summary.completed,
                failed: summary.failed,
                dlq: summary.dlq,
            },
            avg_duration_ms: summary.mean_completed_duration_ms,
            recent: summary.recent,
        }
    }
}

async fn get_metrics(
    State(manager): State<SharedManager>,
    Query(query): Query<MetricsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let n = query.recent.unwrap_or(10);
    let summary = manager.metrics_summary(n).await?;
    Ok(Json(MetricsResponse::from(summary)))
}

async fn post_enqueue(
    State(manager): State<SharedManager>,
    Json(job): Json<NewJob>,
) -> Result<impl IntoResponse, ApiError> {
    let job = manager.enqueue(job).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn post_retry(
    State(manager): State<SharedManager>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(manager.retry_dead(&id).await?))
}
