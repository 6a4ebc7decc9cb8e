//! Attempt history, worker liveness and queue audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttemptStatus::Running => "running",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(AttemptStatus::Running),
            "completed" => Ok(AttemptStatus::Completed),
            "failed" => Ok(AttemptStatus::Failed),
            other => Err(format!("unknown attempt status: {}", other)),
        }
    }
}

/// One processing attempt of a run by a worker
///
/// Attempt numbers start at 1 and increase without gaps; at most one attempt
/// per run is `running` at any moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub run_id: String,
    pub attempt: u32,
    pub worker_id: String,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Attempt {
    pub fn started(run_id: impl Into<String>, attempt: u32, worker_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            attempt,
            worker_id: worker_id.into(),
            status: AttemptStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Liveness status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Draining,
    Disabled,
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Draining => "draining",
            WorkerStatus::Disabled => "disabled",
            WorkerStatus::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(WorkerStatus::Online),
            "draining" => Ok(WorkerStatus::Draining),
            "disabled" => Ok(WorkerStatus::Disabled),
            "offline" => Ok(WorkerStatus::Offline),
            other => Err(format!("unknown worker status: {}", other)),
        }
    }
}

/// Periodic liveness upsert, keyed by worker id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub last_seen_at: DateTime<Utc>,
    pub capacity: u32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkerHeartbeat {
    pub fn new(worker_id: impl Into<String>, status: WorkerStatus, capacity: u32) -> Self {
        Self {
            worker_id: worker_id.into(),
            status,
            last_seen_at: Utc::now(),
            capacity,
            metadata: HashMap::new(),
        }
    }
}

/// Well-known queue audit event names
pub mod queue_events {
    pub const ENQUEUED: &str = "queue.enqueued";
    pub const CLAIMED: &str = "queue.claimed";
    pub const RETRIED: &str = "queue.retried";
    pub const DEAD_LETTERED: &str = "queue.dead_lettered";
    pub const RUN_COMPLETED: &str = "run.completed";
    pub const RUN_CANCELED: &str = "run.canceled";
}

/// Append-only audit record of a queue-lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    pub run_id: String,
    /// Event name, one of [`queue_events`]
    pub event: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl QueueEvent {
    pub fn new(run_id: impl Into<String>, event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            run_id: run_id.into(),
            event: event.into(),
            at: Utc::now(),
            payload,
        }
    }
}
