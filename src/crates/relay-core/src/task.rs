//! In-flight queue task payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Execution shape requested for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    /// Single agent loop
    Agent,
    /// Multi-node graph workflow
    Graph,
}

impl Default for TaskMode {
    fn default() -> Self {
        TaskMode::Agent
    }
}

/// The payload carried by a queue delivery
///
/// A task is re-enqueued (with a bumped `attempt`) on retry; `not_before`
/// is the visibility delay — a claim before that instant must be silently
/// requeued with the remaining delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub run_id: String,
    pub session_id: String,
    pub input: String,
    #[serde(default)]
    pub mode: TaskMode,
    /// Named workflow for graph-mode tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// 1-based attempt number for this delivery
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(run_id: impl Into<String>, session_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            input: input.into(),
            mode: TaskMode::Agent,
            workflow: None,
            tools: Vec::new(),
            system_prompt: None,
            attempt: 1,
            max_attempts: 3,
            not_before: None,
            metadata: HashMap::new(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_mode(mut self, mode: TaskMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self.mode = TaskMode::Graph;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.attempt = attempt;
        self.max_attempts = max_attempts;
        self
    }

    /// Remaining visibility delay relative to `now`, if any
    pub fn remaining_delay(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        match self.not_before {
            Some(nb) if nb > now => (nb - now).to_std().ok(),
            _ => None,
        }
    }

    /// Whether this delivery has retries left after a failure
    pub fn has_retries_left(&self) -> bool {
        self.attempt < self.max_attempts
    }
}
