//! Shared graph state (the blackboard)

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mutable state threaded through every node of a run
///
/// `data` is the shared blackboard: keys are application-chosen and values
/// must survive a JSON round trip (they are snapshotted into checkpoints).
/// Typed accessors return a validation error on shape mismatch rather than
/// panicking.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphState {
    pub input: String,
    pub output: String,
    pub run_id: String,
    pub session_id: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl GraphState {
    pub fn new(
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            input: input.into(),
            output: String::new(),
            run_id: run_id.into(),
            session_id: session_id.into(),
            data: HashMap::new(),
        }
    }

    /// Insert a value under `key`
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Raw value under `key`, if present
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// String value under `key`; missing or non-string values are a
    /// validation error
    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.data
            .get(key)
            .ok_or_else(|| GraphError::Validation(format!("missing state key '{}'", key)))?
            .as_str()
            .ok_or_else(|| GraphError::Validation(format!("state key '{}' is not a string", key)))
    }

    /// Typed extraction via serde; shape mismatches are a validation error
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .data
            .get(key)
            .ok_or_else(|| GraphError::Validation(format!("missing state key '{}'", key)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| GraphError::Validation(format!("state key '{}': {}", key, e)))
    }
}
