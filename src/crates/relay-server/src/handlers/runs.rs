//! Run inspection and lifecycle handlers

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use relay_core::{Checkpoint, Run, RunQuery, RunStatus, TaskMode};
use relay_dispatch::{SubmitReceipt, SubmitRequest};
use relay_events::RunEvent;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct RunListParams {
    pub session_id: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    #[serde(default)]
    pub limit: usize,
}

impl LimitParams {
    pub fn effective(&self) -> usize {
        if self.limit == 0 {
            50
        } else {
            self.limit
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub input: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<RunListParams>,
) -> Result<Json<Vec<Run>>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<RunStatus>)
        .transpose()
        .map_err(ApiError::bad_request)?;
    let query = RunQuery {
        session_id: params.session_id,
        status,
        limit: params.limit,
        offset: params.offset,
    };
    Ok(Json(state.store.list_runs(&query).await?))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(state.store.load_run(&run_id).await?))
}

pub async fn submit_run(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitReceipt>, ApiError> {
    if body.input.trim().is_empty() {
        return Err(ApiError::bad_request("input must not be empty"));
    }
    let mode = if body.workflow.is_some() {
        TaskMode::Graph
    } else {
        TaskMode::Agent
    };
    let request = SubmitRequest {
        run_id: None,
        session_id: body.session_id,
        input: body.input,
        mode,
        workflow: body.workflow,
        tools: body.tools,
        system_prompt: body.system_prompt,
        metadata: body.metadata,
    };
    Ok(Json(state.coordinator.submit_run(request).await?))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(state.coordinator.cancel_run(&run_id).await?))
}

pub async fn requeue_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<SubmitReceipt>, ApiError> {
    Ok(Json(state.coordinator.requeue_run(&run_id).await?))
}

pub async fn list_run_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<RunEvent>>, ApiError> {
    Ok(Json(state.events.list_events(&run_id, params.effective()).await?))
}

pub async fn list_checkpoints(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Checkpoint>>, ApiError> {
    Ok(Json(
        state
            .store
            .list_checkpoints(&run_id, params.effective())
            .await?,
    ))
}

pub async fn latest_checkpoint(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Checkpoint>, ApiError> {
    state
        .store
        .load_latest_checkpoint(&run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no checkpoints for run {}", run_id)))
}
