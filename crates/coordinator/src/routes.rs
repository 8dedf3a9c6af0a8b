use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use logrelay_common::api::coordinator::{
    AckResponse, GetWorkRequest, GetWorkResponse, MetricsResponse, StatsResponse, StatusRequest,
    StatusUpdate, SubmitResponse, TaskPayload,
};
use logrelay_common::types::LogRecord;

use crate::state::QueueState;

/// Build the coordinator router. Malformed JSON bodies are rejected with a
/// 4xx by the extractor before any handler runs.
pub fn router(state: Arc<QueueState>) -> Router {
    Router::new()
        .route("/submit", post(submit_handler))
        .route("/get_work", post(get_work_handler))
        .route("/status", post(status_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// POST /submit — enqueue a log record, return its task id.
async fn submit_handler(
    State(state): State<Arc<QueueState>>,
    Json(record): Json<LogRecord>,
) -> Json<SubmitResponse> {
    let task_id = state.submit(record);
    metrics::counter!("coordinator.submit.count").increment(1);
    Json(SubmitResponse { task_id })
}

/// POST /get_work — hand the backlog head to the calling consumer.
async fn get_work_handler(
    State(state): State<Arc<QueueState>>,
    Json(request): Json<GetWorkRequest>,
) -> Json<GetWorkResponse> {
    match state.assign(&request.consumer_id, request.weight) {
        Some((task_id, record)) => {
            metrics::counter!("coordinator.assign.count").increment(1);
            Json(GetWorkResponse {
                has_work: true,
                task_id: Some(task_id),
                payload: Some(TaskPayload { task_id, record }),
            })
        }
        None => Json(GetWorkResponse::empty()),
    }
}

/// POST /status — heartbeat or terminal report.
///
/// Always acknowledges: stale updates (requeued, reassigned, already
/// terminal, or unknown ids) are accepted no-ops by design.
async fn status_handler(
    State(state): State<Arc<QueueState>>,
    Json(request): Json<StatusRequest>,
) -> Json<AckResponse> {
    match request.status {
        StatusUpdate::InProgress => {
            state.heartbeat(&request.consumer_id, request.task_id);
        }
        StatusUpdate::Completed => {
            if state.complete(&request.consumer_id, request.task_id) {
                metrics::counter!("coordinator.tasks.completed").increment(1);
            }
        }
        StatusUpdate::Failed => {
            let reason = request.reason.as_deref().unwrap_or("unspecified");
            if state.fail(&request.consumer_id, request.task_id, reason) {
                metrics::counter!("coordinator.tasks.failed").increment(1);
            }
        }
    }
    Json(AckResponse { ok: true })
}

/// GET /stats — full counter snapshot.
async fn stats_handler(State(state): State<Arc<QueueState>>) -> Json<StatsResponse> {
    Json(state.stats())
}

/// GET /metrics — the autoscaler's view of the queue.
async fn metrics_handler(State(state): State<Arc<QueueState>>) -> Json<MetricsResponse> {
    Json(state.metrics())
}

/// GET /health — liveness only.
async fn health_handler() -> Json<AckResponse> {
    Json(AckResponse { ok: true })
}
