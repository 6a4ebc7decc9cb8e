//! OpenAI-compatible chat-completions provider
//!
//! The runtime core is provider-agnostic; this adapter covers the common
//! deployment case of an OpenAI-compatible endpoint (hosted APIs, vLLM,
//! Ollama and friends speak the same shape). Non-streaming only: the agent
//! loop consumes complete responses.

use async_trait::async_trait;
use relay_agent::{AgentError, GenerateRequest, GenerateResponse, Provider};
use relay_core::{Message, Role, ToolCall, Usage};
use serde::Deserialize;
use serde_json::json;

/// Provider over an OpenAI-compatible `/chat/completions` endpoint
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpProvider {
    /// # Arguments
    /// * `base_url` - endpoint base, e.g. `https://api.openai.com/v1`
    /// * `model` - model name sent on every request
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest) -> relay_agent::Result<GenerateResponse> {
        let body = build_request_body(&self.model, &request);

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| AgentError::Provider(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider(format!(
                "endpoint returned {}: {}",
                status, detail
            )));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("bad response body: {}", e)))?;
        parse_response(body)
    }
}

/// Build the wire request from an agent generation request
fn build_request_body(model: &str, request: &GenerateRequest) -> serde_json::Value {
    let mut messages = Vec::new();
    if let Some(system) = &request.system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }
    for message in &request.messages {
        messages.push(match message.role {
            Role::User => json!({"role": "user", "content": message.content}),
            Role::Assistant => {
                let mut entry = json!({"role": "assistant", "content": message.content});
                if let Some(calls) = &message.tool_calls {
                    entry["tool_calls"] = calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": c.arguments.to_string(),
                                },
                            })
                        })
                        .collect();
                }
                entry
            }
            Role::Tool => json!({
                "role": "tool",
                "content": message.content,
                "tool_call_id": message.tool_call_id,
            }),
        });
    }

    let mut body = json!({"model": model, "messages": messages});
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect();
    }
    body
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded arguments, per the wire format
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn parse_response(body: ChatCompletionResponse) -> relay_agent::Result<GenerateResponse> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Provider("response carried no choices".to_string()))?;

    let content = choice.message.content.unwrap_or_default();
    let tool_calls = choice.message.tool_calls.map(|calls| {
        calls
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: serde_json::from_str(&c.function.arguments)
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect::<Vec<_>>()
    });

    let message = match tool_calls {
        Some(calls) if !calls.is_empty() => Message::assistant_with_tool_calls(content, calls),
        _ => Message::assistant(content),
    };

    Ok(GenerateResponse {
        message,
        usage: body.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}
