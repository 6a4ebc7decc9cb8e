//! Synchronous playground run
//!
//! Executes an agent run in-process, bypassing the queue: the run record is
//! created `running` and settled when the loop returns (the direct-mode
//! lifecycle, as opposed to distributed submission which starts `queued`).

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use relay_core::{new_id, Run, RunStatus};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
pub struct PlaygroundBody {
    pub input: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlaygroundResponse {
    pub run_id: String,
    pub session_id: String,
    pub output: String,
    pub iterations: u32,
}

pub async fn run(
    State(state): State<AppState>,
    Json(body): Json<PlaygroundBody>,
) -> Result<Json<PlaygroundResponse>, ApiError> {
    let agent = state.playground.as_ref().ok_or(ApiError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: "no playground provider configured".to_string(),
    })?;

    let run_id = new_id();
    let session_id = body.session_id.unwrap_or_else(new_id);
    let mut run = Run::new(&run_id, &session_id, &body.input, RunStatus::Running);
    run.provider = agent.provider_name().to_string();
    state.store.save_run(&run).await?;

    let result = agent
        .run_with_history(&CancellationToken::new(), &run_id, &session_id, Vec::new(), &body.input)
        .await;

    match result {
        Ok(result) => {
            run.status = RunStatus::Completed;
            run.output = result.output.clone();
            run.messages = result.messages;
            run.usage = result.usage;
            run.completed_at = Some(Utc::now());
            run.touch();
            state.store.save_run(&run).await?;

            Ok(Json(PlaygroundResponse {
                run_id,
                session_id,
                output: result.output,
                iterations: result.iterations,
            }))
        }
        Err(e) => {
            run.status = RunStatus::Failed;
            run.error = Some(e.to_string());
            run.completed_at = Some(Utc::now());
            run.touch();
            state.store.save_run(&run).await?;
            Err(ApiError::internal(e.to_string()))
        }
    }
}
