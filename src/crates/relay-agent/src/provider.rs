//! Provider trait for language model integration
//!
//! Relay is an orchestration runtime, not an LLM client library: the core
//! defines this trait and provider crates implement it for their chosen
//! backend. The runtime stays provider-agnostic.

use crate::error::Result;
use relay_core::{Message, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Declaration of a tool the model may call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's arguments
    pub parameters: serde_json::Value,
}

/// A single generation request
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl GenerateRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system_prompt: None,
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A complete generation response
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// The assistant message, possibly carrying tool calls
    pub message: Message,
    pub usage: Option<Usage>,
}

/// Chat-based language model backend
///
/// Implementations must be `Send + Sync`; share them across the runtime as
/// `Arc<dyn Provider>`. Network, auth and rate-limit handling belong to the
/// implementation and surface as [`AgentError::Provider`].
///
/// [`AgentError::Provider`]: crate::error::AgentError::Provider
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name recorded on runs, e.g. `openai` or `anthropic`
    fn name(&self) -> &str;

    /// Generate a complete response for the request
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Stub provider echoing the last user message
    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(GenerateResponse {
                message: Message::assistant(format!("echo:{}", last)),
                usage: Some(Usage {
                    input_tokens: 1,
                    output_tokens: 1,
                    total_tokens: 2,
                }),
            })
        }
    }

    #[tokio::test]
    async fn test_trait_object() {
        let provider: Arc<dyn Provider> = Arc::new(EchoProvider);
        let response = provider
            .generate(GenerateRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(response.message.content, "echo:hi");
    }
}
