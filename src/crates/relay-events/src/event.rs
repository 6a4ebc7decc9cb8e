//! Structured event definitions for observer streaming
//!
//! Events are normalized (timestamp filled, empty strings trimmed to `None`)
//! before they are published or persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Category of a streamed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Run,
    Llm,
    Tool,
    Graph,
    Checkpoint,
    Custom,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Run => "run",
            EventKind::Llm => "llm",
            EventKind::Tool => "tool",
            EventKind::Graph => "graph",
            EventKind::Checkpoint => "checkpoint",
            EventKind::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(EventKind::Run),
            "llm" => Ok(EventKind::Llm),
            "tool" => Ok(EventKind::Tool),
            "graph" => Ok(EventKind::Graph),
            "checkpoint" => Ok(EventKind::Checkpoint),
            "custom" => Ok(EventKind::Custom),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}

/// Phase of the operation the event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Started,
    Completed,
    Failed,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventStatus::Started => "started",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(EventStatus::Started),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(format!("unknown event status: {}", other)),
        }
    }
}

/// A structured event streamed to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    #[serde(default)]
    pub session_id: String,
    pub kind: EventKind,
    pub status: EventStatus,
    /// Short machine-readable name, e.g. `node.prepare` or `llm.generate`
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RunEvent {
    pub fn new(
        run_id: impl Into<String>,
        kind: EventKind,
        status: EventStatus,
        name: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: String::new(),
            kind,
            status,
            name: name.into(),
            message: String::new(),
            tool_name: None,
            duration_ms: 0,
            attributes: HashMap::new(),
            error: None,
            timestamp: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Fill the timestamp and trim empty optional strings
    pub fn normalize(mut self) -> Self {
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
        if self.tool_name.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.tool_name = None;
        }
        if self.error.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.error = None;
        }
        self
    }
}
