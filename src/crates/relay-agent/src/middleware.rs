//! Middleware hooks wrapping the agent loop
//!
//! All hooks default to no-ops; implement only what you need. Hooks are
//! observation points and cannot alter the loop's control flow.

use crate::error::AgentError;
use crate::provider::GenerateResponse;
use async_trait::async_trait;
use relay_core::{Message, ToolCall};

/// Observation hooks around provider calls and tool invocations
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before_generate(&self, _messages: &[Message]) {}

    async fn after_generate(&self, _response: &GenerateResponse) {}

    async fn before_tool(&self, _call: &ToolCall) {}

    async fn after_tool(&self, _call: &ToolCall, _result: &str) {}

    async fn on_error(&self, _error: &AgentError) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        generates: AtomicUsize,
    }

    #[async_trait]
    impl Middleware for Counter {
        async fn before_generate(&self, _messages: &[Message]) {
            self.generates.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn test_default_hooks_are_noops() {
        let counter = Counter {
            generates: AtomicUsize::new(0),
        };
        counter.before_generate(&[]).await;
        counter.after_tool(
            &ToolCall {
                id: "c1".to_string(),
                name: "t".to_string(),
                arguments: serde_json::json!({}),
            },
            "ok",
        )
        .await;
        assert_eq!(counter.generates.load(Ordering::Relaxed), 1);
    }
}
