//! Runtime observability handlers: queue, workers, DLQ, attempts

use crate::error::ApiError;
use crate::handlers::runs::LimitParams;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use relay_core::{Attempt, QueueEvent, WorkerHeartbeat};
use relay_dispatch::{DlqEntry, QueueStats};
use serde::Deserialize;
use serde_json::json;

pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.coordinator.queue_stats().await?))
}

pub async fn list_workers(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<WorkerHeartbeat>>, ApiError> {
    Ok(Json(state.coordinator.list_workers(params.effective()).await?))
}

pub async fn list_dlq(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<DlqEntry>>, ApiError> {
    Ok(Json(state.coordinator.list_dlq(params.effective()).await?))
}

pub async fn list_run_attempts(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Attempt>>, ApiError> {
    Ok(Json(
        state
            .coordinator
            .list_run_attempts(&run_id, params.effective())
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct QueueEventParams {
    pub run_id: Option<String>,
    #[serde(default)]
    pub limit: usize,
}

pub async fn list_queue_events(
    State(state): State<AppState>,
    Query(params): Query<QueueEventParams>,
) -> Result<Json<Vec<QueueEvent>>, ApiError> {
    let limit = if params.limit == 0 { 50 } else { params.limit };
    Ok(Json(
        state
            .coordinator
            .list_queue_events(params.run_id.as_deref(), limit)
            .await?,
    ))
}

/// Aggregate metrics summary
pub async fn metrics(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let queue = state.coordinator.queue_stats().await?;
    let workers = state.coordinator.list_workers(100).await?;
    Ok(Json(json!({
        "queue": queue,
        "workers": workers.len(),
        "event_subscribers": state.bus.subscriber_count(),
        "events_dropped": state.bus.dropped_count(),
    })))
}
