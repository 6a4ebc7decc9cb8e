//! The iterative reason/act loop
//!
//! Each iteration calls the provider with the conversation so far; if the
//! response carries tool calls they are executed by name and their results
//! appended as tool messages, otherwise the assistant message is final and
//! the loop stops. An iteration cap bounds runaway conversations.

use crate::error::{AgentError, Result};
use crate::middleware::Middleware;
use crate::provider::{GenerateRequest, GenerateResponse, Provider};
use crate::tool::{Tool, ToolRegistry};
use relay_core::{new_id, Message, Usage};
use relay_events::{EventBus, EventKind, EventStatus, RunEvent};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Outcome of a detailed agent run
#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub output: String,
    pub messages: Vec<Message>,
    pub run_id: String,
    pub session_id: String,
    pub usage: Option<Usage>,
    pub iterations: u32,
    /// Events emitted during the run, in order
    pub events: Vec<RunEvent>,
}

/// Configurable agent wrapping a provider, tools and middleware
pub struct Agent {
    provider: Arc<dyn Provider>,
    system_prompt: Option<String>,
    tools: ToolRegistry,
    middleware: Vec<Arc<dyn Middleware>>,
    max_iterations: u32,
    output_schema: Option<serde_json::Value>,
    bus: Option<Arc<EventBus>>,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            system_prompt: None,
            tools: ToolRegistry::new(),
            middleware: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            output_schema: None,
            bus: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Validate the final assistant message against this JSON schema and
    /// re-query once on mismatch
    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run the loop on a fresh conversation
    pub async fn run_detailed(&self, ctx: &CancellationToken, input: &str) -> Result<AgentRunResult> {
        self.run_with_history(ctx, &new_id(), &new_id(), Vec::new(), input)
            .await
    }

    /// Run the loop continuing an existing conversation
    ///
    /// `history` is the run's prior message list loaded from the state
    /// store; the new user input is appended to it.
    pub async fn run_with_history(
        &self,
        ctx: &CancellationToken,
        run_id: &str,
        session_id: &str,
        history: Vec<Message>,
        input: &str,
    ) -> Result<AgentRunResult> {
        let mut messages = history;
        messages.push(Message::user(input));

        let mut events = Vec::new();
        let mut usage: Option<Usage> = None;
        let mut iterations = 0;
        let mut final_message = None;

        for iteration in 1..=self.max_iterations {
            iterations = iteration;
            if ctx.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let response = self
                .generate_once(ctx, run_id, session_id, &messages, &mut events)
                .await?;

            if let Some(sample) = &response.usage {
                usage.get_or_insert_with(Usage::default).add(sample);
            }

            messages.push(response.message.clone());

            if !response.message.has_tool_calls() {
                final_message = Some(response.message);
                break;
            }

            let calls = response.message.tool_calls.clone().unwrap_or_default();
            for call in &calls {
                let result = self
                    .invoke_tool(ctx, run_id, session_id, call, &mut events)
                    .await?;
                messages.push(Message::tool_result(&call.id, result));
            }
        }

        // Iteration cap reached mid-conversation: the last assistant message
        // stands as the output.
        let mut final_message = match final_message {
            Some(m) => m,
            None => {
                warn!(run_id = %run_id, max = self.max_iterations, "iteration cap reached");
                messages
                    .iter()
                    .rev()
                    .find(|m| m.role == relay_core::Role::Assistant)
                    .cloned()
                    .ok_or_else(|| AgentError::Provider("no assistant response".to_string()))?
            }
        };

        if let Some(schema) = &self.output_schema {
            if let Err(reason) = validate_against_schema(schema, &final_message.content) {
                debug!(run_id = %run_id, reason = %reason, "structured output invalid, re-querying once");
                messages.push(Message::user(format!(
                    "The previous response did not match the required JSON schema ({}). \
                     Reply again with only a JSON document matching the schema.",
                    reason
                )));
                let response = self
                    .generate_once(ctx, run_id, session_id, &messages, &mut events)
                    .await?;
                if let Some(sample) = &response.usage {
                    usage.get_or_insert_with(Usage::default).add(sample);
                }
                messages.push(response.message.clone());
                validate_against_schema(schema, &response.message.content)
                    .map_err(AgentError::Validation)?;
                final_message = response.message;
                iterations += 1;
            }
        }

        Ok(AgentRunResult {
            output: final_message.content,
            messages,
            run_id: run_id.to_string(),
            session_id: session_id.to_string(),
            usage,
            iterations,
            events,
        })
    }

    async fn generate_once(
        &self,
        ctx: &CancellationToken,
        run_id: &str,
        session_id: &str,
        messages: &[Message],
        events: &mut Vec<RunEvent>,
    ) -> Result<GenerateResponse> {
        for mw in &self.middleware {
            mw.before_generate(messages).await;
        }
        self.emit(
            events,
            RunEvent::new(run_id, EventKind::Llm, EventStatus::Started, "llm.generate")
                .with_session(session_id),
        );

        let mut request = GenerateRequest::new(messages.to_vec()).with_tools(self.tools.definitions());
        request.system_prompt = self.system_prompt.clone();

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(AgentError::Cancelled),
            result = self.provider.generate(request) => result,
        };
        let elapsed = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                self.emit(
                    events,
                    RunEvent::new(run_id, EventKind::Llm, EventStatus::Completed, "llm.generate")
                        .with_session(session_id)
                        .with_duration_ms(elapsed),
                );
                for mw in &self.middleware {
                    mw.after_generate(&response).await;
                }
                Ok(response)
            }
            Err(error) => {
                self.emit(
                    events,
                    RunEvent::new(run_id, EventKind::Llm, EventStatus::Failed, "llm.generate")
                        .with_session(session_id)
                        .with_duration_ms(elapsed)
                        .with_error(error.to_string()),
                );
                for mw in &self.middleware {
                    mw.on_error(&error).await;
                }
                Err(error)
            }
        }
    }

    /// Execute one tool call, always producing a result string
    ///
    /// An unknown tool or a failing tool yields an error description as the
    /// tool result so the model can recover; only cancellation aborts.
    async fn invoke_tool(
        &self,
        ctx: &CancellationToken,
        run_id: &str,
        session_id: &str,
        call: &relay_core::ToolCall,
        events: &mut Vec<RunEvent>,
    ) -> Result<String> {
        for mw in &self.middleware {
            mw.before_tool(call).await;
        }
        self.emit(
            events,
            RunEvent::new(run_id, EventKind::Tool, EventStatus::Started, "tool.call")
                .with_session(session_id)
                .with_tool(&call.name),
        );

        let started = Instant::now();
        let outcome = match self.tools.get(&call.name) {
            Some(tool) => {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return Err(AgentError::Cancelled),
                    result = tool.call(call.arguments.clone()) => result,
                }
            }
            None => Err(AgentError::tool(&call.name, "unknown tool")),
        };
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                self.emit(
                    events,
                    RunEvent::new(run_id, EventKind::Tool, EventStatus::Completed, "tool.call")
                        .with_session(session_id)
                        .with_tool(&call.name)
                        .with_duration_ms(elapsed),
                );
                for mw in &self.middleware {
                    mw.after_tool(call, &result).await;
                }
                Ok(result)
            }
            Err(error) => {
                self.emit(
                    events,
                    RunEvent::new(run_id, EventKind::Tool, EventStatus::Failed, "tool.call")
                        .with_session(session_id)
                        .with_tool(&call.name)
                        .with_duration_ms(elapsed)
                        .with_error(error.to_string()),
                );
                for mw in &self.middleware {
                    mw.on_error(&error).await;
                }
                Ok(format!("error: {}", error))
            }
        }
    }

    fn emit(&self, events: &mut Vec<RunEvent>, event: RunEvent) {
        let event = event.normalize();
        if let Some(bus) = &self.bus {
            bus.publish(event.clone());
        }
        events.push(event);
    }
}

/// Check that `content` parses as JSON and satisfies `schema`
fn validate_against_schema(schema: &serde_json::Value, content: &str) -> std::result::Result<(), String> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| format!("not valid JSON: {}", e))?;
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| format!("invalid schema: {}", e))?;
    if let Err(errors) = compiled.validate(&value) {
        let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(detail.join("; "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use relay_core::ToolCall;
    use std::sync::Mutex;

    /// Provider returning a scripted sequence of responses
    struct ScriptedProvider {
        responses: Mutex<Vec<Message>>,
    }

    impl ScriptedProvider {
        fn new(mut responses: Vec<Message>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse> {
            let message = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AgentError::Provider("script exhausted".to_string()))?;
            Ok(GenerateResponse {
                message,
                usage: Some(Usage {
                    input_tokens: 2,
                    output_tokens: 3,
                    total_tokens: 5,
                }),
            })
        }
    }

    struct Doubler;

    #[async_trait]
    impl Tool for Doubler {
        fn name(&self) -> &str {
            "double"
        }

        async fn call(&self, arguments: serde_json::Value) -> Result<String> {
            let n = arguments["n"].as_i64().unwrap_or(0);
            Ok((n * 2).to_string())
        }
    }

    fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call-1".to_string(),
            name: name.to_string(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn test_plain_answer_single_iteration() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant("42")]));
        let agent = Agent::new(provider);

        let result = agent
            .run_detailed(&CancellationToken::new(), "what is 6*7?")
            .await
            .unwrap();
        assert_eq!(result.output, "42");
        assert_eq!(result.iterations, 1);
        // user + assistant
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Message::assistant_with_tool_calls("", vec![tool_call("double", serde_json::json!({"n": 21}))]),
            Message::assistant("the answer is 42"),
        ]));
        let agent = Agent::new(provider).with_tool(Arc::new(Doubler));

        let result = agent
            .run_detailed(&CancellationToken::new(), "double 21")
            .await
            .unwrap();
        assert_eq!(result.output, "the answer is 42");
        assert_eq!(result.iterations, 2);

        // user, assistant(tool call), tool result, assistant
        assert_eq!(result.messages.len(), 4);
        let tool_msg = &result.messages[2];
        assert_eq!(tool_msg.role, relay_core::Role::Tool);
        assert_eq!(tool_msg.content, "42");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Message::assistant_with_tool_calls("", vec![tool_call("nope", serde_json::json!({}))]),
            Message::assistant("recovered"),
        ]));
        let agent = Agent::new(provider);

        let result = agent
            .run_detailed(&CancellationToken::new(), "go")
            .await
            .unwrap();
        assert_eq!(result.output, "recovered");
        assert!(result.messages[2].content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        // Every response asks for another tool call; the cap must stop it.
        let looping: Vec<Message> = (0..5)
            .map(|_| {
                Message::assistant_with_tool_calls(
                    "still working",
                    vec![tool_call("double", serde_json::json!({"n": 1}))],
                )
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(looping));
        let agent = Agent::new(provider)
            .with_tool(Arc::new(Doubler))
            .with_max_iterations(3);

        let result = agent
            .run_detailed(&CancellationToken::new(), "loop")
            .await
            .unwrap();
        assert_eq!(result.iterations, 3);
        assert_eq!(result.output, "still working");
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant("late")]));
        let agent = Agent::new(provider);

        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = agent.run_detailed(&ctx, "hi").await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_structured_output_requeries_once() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["answer"],
            "properties": {"answer": {"type": "number"}}
        });
        let provider = Arc::new(ScriptedProvider::new(vec![
            Message::assistant("not json at all"),
            Message::assistant(r#"{"answer": 42}"#),
        ]));
        let agent = Agent::new(provider).with_output_schema(schema);

        let result = agent
            .run_detailed(&CancellationToken::new(), "answer?")
            .await
            .unwrap();
        assert_eq!(result.output, r#"{"answer": 42}"#);
        // the correction prompt is part of the transcript
        assert!(result
            .messages
            .iter()
            .any(|m| m.content.contains("JSON schema")));
    }

    #[tokio::test]
    async fn test_structured_output_fails_after_second_mismatch() {
        let schema = serde_json::json!({"type": "object"});
        let provider = Arc::new(ScriptedProvider::new(vec![
            Message::assistant("nope"),
            Message::assistant("still nope"),
        ]));
        let agent = Agent::new(provider).with_output_schema(schema);

        let err = agent
            .run_detailed(&CancellationToken::new(), "answer?")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Message::assistant_with_tool_calls("", vec![tool_call("double", serde_json::json!({"n": 2}))]),
            Message::assistant("4"),
        ]));
        let agent = Agent::new(provider).with_tool(Arc::new(Doubler));

        let result = agent
            .run_detailed(&CancellationToken::new(), "double 2")
            .await
            .unwrap();
        let names: Vec<(String, EventStatus)> = result
            .events
            .iter()
            .map(|e| (e.name.clone(), e.status))
            .collect();
        assert_eq!(
            names,
            vec![
                ("llm.generate".to_string(), EventStatus::Started),
                ("llm.generate".to_string(), EventStatus::Completed),
                ("tool.call".to_string(), EventStatus::Started),
                ("tool.call".to_string(), EventStatus::Completed),
                ("llm.generate".to_string(), EventStatus::Started),
                ("llm.generate".to_string(), EventStatus::Completed),
            ]
        );
    }
}
