//! Row structs mapping SQLite tables to domain types
//!
//! Timestamps are ISO8601 strings and JSON payloads are text columns;
//! conversion failures surface as [`StoreError::Storage`].

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use relay_core::{Attempt, Checkpoint, QueueEvent, Run, WorkerHeartbeat};
use relay_events::RunEvent;
use sqlx::FromRow;

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Storage(format!("bad timestamp '{}': {}", raw, e)))
}

pub(crate) fn parse_opt_ts(raw: &Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_status<T: std::str::FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse().map_err(StoreError::Storage)
}

#[derive(Debug, FromRow)]
pub(crate) struct RunRow {
    pub run_id: String,
    pub session_id: String,
    pub provider: String,
    pub status: String,
    pub input: String,
    pub output: String,
    pub messages_json: String,
    pub usage_json: Option<String>,
    pub metadata_json: String,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl TryFrom<RunRow> for Run {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Run> {
        Ok(Run {
            run_id: row.run_id,
            session_id: row.session_id,
            provider: row.provider,
            status: parse_status(&row.status)?,
            input: row.input,
            output: row.output,
            messages: serde_json::from_str(&row.messages_json)?,
            usage: row
                .usage_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            metadata: serde_json::from_str(&row.metadata_json)?,
            error: row.error,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            completed_at: parse_opt_ts(&row.completed_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct CheckpointRow {
    pub run_id: String,
    pub seq: i64,
    pub node_id: String,
    pub state_json: String,
    pub created_at: String,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = StoreError;

    fn try_from(row: CheckpointRow) -> Result<Checkpoint> {
        Ok(Checkpoint {
            run_id: row.run_id,
            seq: row.seq as u64,
            node_id: row.node_id,
            state: serde_json::from_str(&row.state_json)?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct AttemptRow {
    pub run_id: String,
    pub attempt: i64,
    pub worker_id: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub error: Option<String>,
    pub metadata_json: String,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = StoreError;

    fn try_from(row: AttemptRow) -> Result<Attempt> {
        Ok(Attempt {
            run_id: row.run_id,
            attempt: row.attempt as u32,
            worker_id: row.worker_id,
            status: parse_status(&row.status)?,
            started_at: parse_ts(&row.started_at)?,
            ended_at: parse_opt_ts(&row.ended_at)?,
            error: row.error,
            metadata: serde_json::from_str(&row.metadata_json)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct HeartbeatRow {
    pub worker_id: String,
    pub status: String,
    pub last_seen_at: String,
    pub capacity: i64,
    pub metadata_json: String,
}

impl TryFrom<HeartbeatRow> for WorkerHeartbeat {
    type Error = StoreError;

    fn try_from(row: HeartbeatRow) -> Result<WorkerHeartbeat> {
        Ok(WorkerHeartbeat {
            worker_id: row.worker_id,
            status: parse_status(&row.status)?,
            last_seen_at: parse_ts(&row.last_seen_at)?,
            capacity: row.capacity as u32,
            metadata: serde_json::from_str(&row.metadata_json)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct QueueEventRow {
    pub run_id: String,
    pub event: String,
    pub at: String,
    pub payload_json: String,
}

impl TryFrom<QueueEventRow> for QueueEvent {
    type Error = StoreError;

    fn try_from(row: QueueEventRow) -> Result<QueueEvent> {
        Ok(QueueEvent {
            run_id: row.run_id,
            event: row.event,
            at: parse_ts(&row.at)?,
            payload: serde_json::from_str(&row.payload_json)?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct RunEventRow {
    pub run_id: String,
    pub session_id: String,
    pub kind: String,
    pub status: String,
    pub name: String,
    pub message: String,
    pub tool_name: Option<String>,
    pub duration_ms: i64,
    pub attributes_json: String,
    pub error: Option<String>,
    pub timestamp: String,
}

impl TryFrom<RunEventRow> for RunEvent {
    type Error = StoreError;

    fn try_from(row: RunEventRow) -> Result<RunEvent> {
        Ok(RunEvent {
            run_id: row.run_id,
            session_id: row.session_id,
            kind: parse_status(&row.kind)?,
            status: parse_status(&row.status)?,
            name: row.name,
            message: row.message,
            tool_name: row.tool_name,
            duration_ms: row.duration_ms as u64,
            attributes: serde_json::from_str(&row.attributes_json)?,
            error: row.error,
            timestamp: Some(parse_ts(&row.timestamp)?),
        })
    }
}
