//! Run records and their lifecycle

use crate::message::{Message, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a run
///
/// Transitions are monotonic except `running -> queued` on requeue. The
/// terminal states are `completed`, `failed` and `canceled`; a canceled run
/// never becomes `completed` even if a stale worker finishes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    /// Whether this status admits no further transitions (except requeue of
    /// a failed run)
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Canceled)
    }

    /// Whether a transition from `self` to `to` is allowed
    pub fn can_transition(&self, to: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, to),
            (Queued, Running)
                | (Queued, Canceled)
                | (Running, Completed)
                | (Running, Queued)
                | (Running, Failed)
                | (Running, Canceled)
                | (Failed, Queued)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "canceled" => Ok(RunStatus::Canceled),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// A single agent or graph execution, grouped by session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier
    pub run_id: String,
    /// Session grouping id
    pub session_id: String,
    /// Provider name recorded by the executing processor
    pub provider: String,
    /// Current lifecycle status
    pub status: RunStatus,
    /// Submitted input
    pub input: String,
    /// Final output, set on completion
    pub output: String,
    /// Append-only conversation history
    pub messages: Vec<Message>,
    /// Accumulated token usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Free-form metadata (queue name, attempt counters, worker stamps)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Error message for failed or canceled runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new run in the given initial status
    pub fn new(
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        input: impl Into<String>,
        status: RunStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            provider: String::new(),
            status,
            input: input.into(),
            output: String::new(),
            messages: Vec::new(),
            usage: None,
            metadata: HashMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Set a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Stamp `updated_at` to now
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Filter for listing runs; results are most-recent-first by `updated_at`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl RunQuery {
    /// Effective limit, defaulting to 50 when unset
    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            50
        } else {
            self.limit
        }
    }
}
