//! Graph traversal with per-node checkpointing and resume
//!
//! After every successful node execution the executor selects the outgoing
//! edge, persists a checkpoint carrying the state snapshot and the chosen
//! next node, then updates the run record. A failed node marks the run
//! `failed` without any internal retry; `resume` restarts at the recorded
//! next node so previously successful nodes are never re-executed.

use crate::error::{GraphError, Result};
use crate::graph::CompiledGraph;
use crate::node::NodeId;
use crate::state::GraphState;
use chrono::Utc;
use relay_core::{new_id, Checkpoint, Run, RunStatus};
use relay_events::{EventBus, EventKind, EventStatus, RunEvent};
use relay_store::StateStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Checkpoint payload: the complete state plus the traversal position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: GraphState,
    /// Node to execute next; `None` means the run finished here
    pub next_node: Option<NodeId>,
    /// Ordered list of node ids executed so far
    pub node_trace: Vec<NodeId>,
}

/// Outcome of a graph run
#[derive(Debug, Clone)]
pub struct GraphRunResult {
    pub run_id: String,
    pub session_id: String,
    pub output: String,
    pub state: GraphState,
    pub node_trace: Vec<NodeId>,
    /// Sequence number of the last persisted checkpoint
    pub checkpoints: u64,
}

/// Executes compiled graphs against a state store
pub struct GraphExecutor {
    store: Arc<dyn StateStore>,
    bus: Option<Arc<EventBus>>,
}

impl GraphExecutor {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store, bus: None }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Run a graph on a fresh run id
    pub async fn run(
        &self,
        ctx: &CancellationToken,
        graph: &CompiledGraph,
        input: &str,
    ) -> Result<GraphRunResult> {
        self.run_task(ctx, graph, &new_id(), &new_id(), input).await
    }

    /// Run a graph under known run/session ids
    ///
    /// Used by queue processors: if the run record already exists (the
    /// coordinator created it) its metadata is preserved, and a prior
    /// checkpoint means this delivery is a redelivery, so execution
    /// continues from the checkpoint instead of starting over.
    pub async fn run_task(
        &self,
        ctx: &CancellationToken,
        graph: &CompiledGraph,
        run_id: &str,
        session_id: &str,
        input: &str,
    ) -> Result<GraphRunResult> {
        let mut run = match self.store.load_run(run_id).await {
            Ok(run) => run,
            Err(e) if e.is_not_found() => {
                Run::new(run_id, session_id, input, RunStatus::Running)
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(checkpoint) = self.store.load_latest_checkpoint(run_id).await? {
            debug!(run_id = %run_id, seq = checkpoint.seq, "redelivery, resuming from checkpoint");
            return self.drive_from_checkpoint(ctx, graph, run, checkpoint).await;
        }

        run.status = RunStatus::Running;
        run.touch();
        self.store.save_run(&run).await?;

        let state = GraphState::new(run_id, session_id, input);
        self.drive(ctx, graph, run, state, Some(graph.start().clone()), 0, Vec::new())
            .await
    }

    /// Resume a failed (or interrupted) run from its latest checkpoint
    ///
    /// With no checkpoint the graph restarts from its start node with the
    /// run's original input.
    pub async fn resume(
        &self,
        ctx: &CancellationToken,
        graph: &CompiledGraph,
        run_id: &str,
    ) -> Result<GraphRunResult> {
        let mut run = self
            .store
            .load_run(run_id)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => GraphError::NotFound(format!("run {}", run_id)),
                e => e.into(),
            })?;

        if run.status == RunStatus::Canceled {
            return Err(GraphError::Cancelled);
        }

        match self.store.load_latest_checkpoint(run_id).await? {
            Some(checkpoint) => self.drive_from_checkpoint(ctx, graph, run, checkpoint).await,
            None => {
                run.status = RunStatus::Running;
                run.error = None;
                run.completed_at = None;
                run.touch();
                self.store.save_run(&run).await?;
                let state = GraphState::new(run_id, run.session_id.clone(), run.input.clone());
                self.drive(ctx, graph, run, state, Some(graph.start().clone()), 0, Vec::new())
                    .await
            }
        }
    }

    async fn drive_from_checkpoint(
        &self,
        ctx: &CancellationToken,
        graph: &CompiledGraph,
        mut run: Run,
        checkpoint: Checkpoint,
    ) -> Result<GraphRunResult> {
        let snapshot: Snapshot = serde_json::from_value(checkpoint.state)?;

        run.status = RunStatus::Running;
        run.error = None;
        run.completed_at = None;
        run.touch();
        self.store.save_run(&run).await?;

        self.drive(
            ctx,
            graph,
            run,
            snapshot.state,
            snapshot.next_node,
            checkpoint.seq,
            snapshot.node_trace,
        )
        .await
    }

    /// The traversal loop shared by run and resume paths
    async fn drive(
        &self,
        ctx: &CancellationToken,
        graph: &CompiledGraph,
        mut run: Run,
        mut state: GraphState,
        mut current: Option<NodeId>,
        mut seq: u64,
        mut trace: Vec<NodeId>,
    ) -> Result<GraphRunResult> {
        while let Some(node_id) = current {
            if ctx.is_cancelled() {
                return Err(GraphError::Cancelled);
            }

            let node = graph.node(&node_id).ok_or_else(|| {
                GraphError::Validation(format!("node '{}' not in graph '{}'", node_id, graph.name()))
            })?;

            self.emit(
                RunEvent::new(&run.run_id, EventKind::Graph, EventStatus::Started, format!("node.{}", node_id))
                    .with_session(&run.session_id),
            );

            let started = Instant::now();
            if let Err(error) = node.kind.execute(ctx, &mut state).await {
                if error.is_cancelled() {
                    return Err(GraphError::Cancelled);
                }
                let message = error.to_string();
                warn!(run_id = %run.run_id, node = %node_id, error = %message, "node failed");

                self.emit(
                    RunEvent::new(&run.run_id, EventKind::Graph, EventStatus::Failed, format!("node.{}", node_id))
                        .with_session(&run.session_id)
                        .with_duration_ms(started.elapsed().as_millis() as u64)
                        .with_error(&message),
                );

                run.status = RunStatus::Failed;
                run.error = Some(message.clone());
                run.completed_at = Some(Utc::now());
                run.touch();
                self.store.save_run(&run).await?;
                return Err(GraphError::node_execution(node_id, message));
            }

            self.emit(
                RunEvent::new(&run.run_id, EventKind::Graph, EventStatus::Completed, format!("node.{}", node_id))
                    .with_session(&run.session_id)
                    .with_duration_ms(started.elapsed().as_millis() as u64),
            );

            trace.push(node_id.clone());
            let next = graph.select_edge(&node_id, &state).map(|e| e.to.clone());

            seq += 1;
            let snapshot = Snapshot {
                state: state.clone(),
                next_node: next.clone(),
                node_trace: trace.clone(),
            };
            self.store
                .save_checkpoint(&Checkpoint::new(
                    &run.run_id,
                    seq,
                    &node_id,
                    serde_json::to_value(&snapshot)?,
                ))
                .await?;

            self.emit(
                RunEvent::new(&run.run_id, EventKind::Checkpoint, EventStatus::Completed, "checkpoint.saved")
                    .with_session(&run.session_id)
                    .with_attribute("seq", serde_json::json!(seq))
                    .with_attribute("node", serde_json::json!(node_id)),
            );

            run.status = RunStatus::Running;
            run.output = state.output.clone();
            run.touch();
            self.store.save_run(&run).await?;

            current = next;
        }

        run.status = RunStatus::Completed;
        run.output = state.output.clone();
        run.completed_at = Some(Utc::now());
        run.touch();
        self.store.save_run(&run).await?;

        info!(run_id = %run.run_id, nodes = trace.len(), "graph run completed");
        self.emit(
            RunEvent::new(&run.run_id, EventKind::Run, EventStatus::Completed, "run.completed")
                .with_session(&run.session_id),
        );

        Ok(GraphRunResult {
            run_id: run.run_id,
            session_id: run.session_id,
            output: state.output.clone(),
            state,
            node_trace: trace,
            checkpoints: seq,
        })
    }

    fn emit(&self, event: RunEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}
