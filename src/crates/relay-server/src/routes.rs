//! Route table

use crate::handlers::{playground, runs, runtime, stream};
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the full API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/runs", get(runs::list_runs).post(runs::submit_run))
        .route("/api/runs/:id", get(runs::get_run))
        .route("/api/runs/:id/cancel", post(runs::cancel_run))
        .route("/api/runs/:id/requeue", post(runs::requeue_run))
        .route("/api/runs/:id/events", get(runs::list_run_events))
        .route("/api/runs/:id/checkpoints", get(runs::list_checkpoints))
        .route("/api/runs/:id/checkpoints/latest", get(runs::latest_checkpoint))
        .route("/api/runs/:id/attempts", get(runtime::list_run_attempts))
        .route("/api/metrics", get(runtime::metrics))
        .route("/api/runtime/queue", get(runtime::queue_stats))
        .route("/api/runtime/workers", get(runtime::list_workers))
        .route("/api/runtime/dlq", get(runtime::list_dlq))
        .route("/api/runtime/events", get(runtime::list_queue_events))
        .route("/stream/events", get(stream::stream_events))
        .route("/api/playground/run", post(playground::run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
