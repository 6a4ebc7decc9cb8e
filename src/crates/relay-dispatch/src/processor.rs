//! Pluggable task processors
//!
//! A worker hands each claimed task to a [`Processor`]; the two provided
//! implementations cover the runtime's execution shapes: [`AgentProcessor`]
//! drives the agent loop and [`GraphProcessor`] executes a named graph
//! workflow. Processors must tolerate redelivery: the run-status guard on
//! claim and checkpoint-based resume make duplicate work detectable.

use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use relay_agent::{Agent, AgentError, Provider, Tool};
use relay_core::{Message, Task, TaskMode, Usage};
use relay_events::EventBus;
use relay_graph::{CompiledGraph, GraphError, GraphExecutor};
use relay_store::StateStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of processing a task
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub output: String,
    /// Provider name stamped on the run record
    pub provider: String,
    /// Full conversation, when the processor produced one
    pub messages: Vec<Message>,
    pub usage: Option<Usage>,
}

/// Executes one claimed task
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, ctx: &CancellationToken, task: &Task) -> Result<ProcessOutcome>;
}

/// Runs agent-mode tasks through the agent loop
///
/// The run's prior messages are loaded from the state store before the loop
/// starts, so conversation continuity survives requeues and worker moves.
pub struct AgentProcessor {
    provider: Arc<dyn Provider>,
    tools: Vec<Arc<dyn Tool>>,
    store: Arc<dyn StateStore>,
    bus: Option<Arc<EventBus>>,
    max_iterations: u32,
}

impl AgentProcessor {
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn StateStore>) -> Self {
        Self {
            provider,
            tools: Vec::new(),
            store,
            bus: None,
            max_iterations: 10,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Assemble a per-task agent honoring the task's system prompt and tool
    /// selection (an empty selection exposes every registered tool)
    fn agent_for(&self, task: &Task) -> Agent {
        let mut agent = Agent::new(self.provider.clone()).with_max_iterations(self.max_iterations);
        for tool in &self.tools {
            if task.tools.is_empty() || task.tools.iter().any(|t| t == tool.name()) {
                agent = agent.with_tool(tool.clone());
            }
        }
        if let Some(prompt) = &task.system_prompt {
            agent = agent.with_system_prompt(prompt);
        }
        if let Some(bus) = &self.bus {
            agent = agent.with_event_bus(bus.clone());
        }
        agent
    }
}

#[async_trait]
impl Processor for AgentProcessor {
    async fn process(&self, ctx: &CancellationToken, task: &Task) -> Result<ProcessOutcome> {
        let history = match self.store.load_run(&task.run_id).await {
            Ok(run) => run.messages,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let agent = self.agent_for(task);
        let result = agent
            .run_with_history(ctx, &task.run_id, &task.session_id, history, &task.input)
            .await
            .map_err(|e| match e {
                AgentError::Cancelled => DispatchError::Cancelled,
                other => DispatchError::Processor(other.to_string()),
            })?;

        Ok(ProcessOutcome {
            output: result.output,
            provider: self.provider.name().to_string(),
            messages: result.messages,
            usage: result.usage,
        })
    }
}

/// Runs graph-mode tasks through the graph executor
///
/// Workflows are registered by name; a redelivered task resumes from its
/// latest checkpoint inside the executor rather than restarting.
pub struct GraphProcessor {
    graphs: HashMap<String, CompiledGraph>,
    executor: Arc<GraphExecutor>,
}

impl GraphProcessor {
    pub fn new(executor: Arc<GraphExecutor>) -> Self {
        Self {
            graphs: HashMap::new(),
            executor,
        }
    }

    pub fn with_workflow(mut self, name: impl Into<String>, graph: CompiledGraph) -> Self {
        self.graphs.insert(name.into(), graph);
        self
    }

    pub fn workflow_names(&self) -> Vec<&str> {
        self.graphs.keys().map(String::as_str).collect()
    }
}

#[async_trait]
impl Processor for GraphProcessor {
    async fn process(&self, ctx: &CancellationToken, task: &Task) -> Result<ProcessOutcome> {
        if task.mode != TaskMode::Graph {
            return Err(DispatchError::Validation(format!(
                "graph processor received {} task {}",
                match task.mode {
                    TaskMode::Agent => "agent",
                    TaskMode::Graph => "graph",
                },
                task.run_id
            )));
        }
        let workflow = task
            .workflow
            .as_deref()
            .ok_or_else(|| DispatchError::Validation(format!("task {} names no workflow", task.run_id)))?;
        let graph = self
            .graphs
            .get(workflow)
            .ok_or_else(|| DispatchError::Validation(format!("unknown workflow '{}'", workflow)))?;

        let result = self
            .executor
            .run_task(ctx, graph, &task.run_id, &task.session_id, &task.input)
            .await
            .map_err(|e| match e {
                e if e.is_cancelled() => DispatchError::Cancelled,
                GraphError::Store(store) => DispatchError::Store(store),
                other => DispatchError::Processor(other.to_string()),
            })?;

        Ok(ProcessOutcome {
            output: result.output,
            provider: "graph".to_string(),
            messages: Vec::new(),
            usage: None,
        })
    }
}

/// Dispatches each task to the agent or graph processor by its mode
///
/// The worker holds a single processor; this one lets a deployment serve
/// both execution shapes. A task whose mode has no registered processor
/// fails with a validation error.
#[derive(Default)]
pub struct ModeProcessor {
    agent: Option<Arc<AgentProcessor>>,
    graph: Option<Arc<GraphProcessor>>,
}

impl ModeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, processor: Arc<AgentProcessor>) -> Self {
        self.agent = Some(processor);
        self
    }

    pub fn with_graph(mut self, processor: Arc<GraphProcessor>) -> Self {
        self.graph = Some(processor);
        self
    }
}

#[async_trait]
impl Processor for ModeProcessor {
    async fn process(&self, ctx: &CancellationToken, task: &Task) -> Result<ProcessOutcome> {
        match task.mode {
            TaskMode::Agent => {
                let processor = self.agent.as_ref().ok_or_else(|| {
                    DispatchError::Validation("no agent processor configured".to_string())
                })?;
                processor.process(ctx, task).await
            }
            TaskMode::Graph => {
                let processor = self.graph.as_ref().ok_or_else(|| {
                    DispatchError::Validation("no graph processor configured".to_string())
                })?;
                processor.process(ctx, task).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_agent::{GenerateRequest, GenerateResponse};
    use relay_core::RunStatus;
    use relay_store::MemoryStore;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, request: GenerateRequest) -> relay_agent::Result<GenerateResponse> {
            let count = request.messages.len();
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(GenerateResponse {
                message: Message::assistant(format!("echo[{}]:{}", count, last)),
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn test_agent_processor_loads_prior_messages() {
        let store = Arc::new(MemoryStore::new());
        let mut run = relay_core::Run::new("r1", "s1", "first", RunStatus::Running);
        run.messages.push(Message::user("first"));
        run.messages.push(Message::assistant("earlier answer"));
        relay_store::StateStore::save_run(store.as_ref(), &run)
            .await
            .unwrap();

        let processor = AgentProcessor::new(Arc::new(EchoProvider), store);
        let task = Task::new("r1", "s1", "second");
        let outcome = processor
            .process(&CancellationToken::new(), &task)
            .await
            .unwrap();

        // two history messages + the new user message were on the request
        assert_eq!(outcome.output, "echo[3]:second");
        assert_eq!(outcome.provider, "echo");
        assert_eq!(outcome.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_mode_processor_dispatches_and_validates() {
        let store = Arc::new(MemoryStore::new());
        let agent = Arc::new(AgentProcessor::new(Arc::new(EchoProvider), store));
        let processor = ModeProcessor::new().with_agent(agent);
        let ctx = CancellationToken::new();

        let outcome = processor
            .process(&ctx, &Task::new("r1", "s1", "hi"))
            .await
            .unwrap();
        assert_eq!(outcome.provider, "echo");

        // graph tasks have no registered processor here
        let err = processor
            .process(&ctx, &Task::new("r2", "s1", "x").with_workflow("triage"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no graph processor"));
    }

    #[tokio::test]
    async fn test_graph_processor_rejects_unknown_workflow() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let executor = Arc::new(GraphExecutor::new(store));
        let processor = GraphProcessor::new(executor);

        let task = Task::new("r1", "s1", "in").with_workflow("ghost");
        let err = processor
            .process(&CancellationToken::new(), &task)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
