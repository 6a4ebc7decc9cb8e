//! Node kinds and execution
//!
//! Nodes are a closed sum type rather than an open trait hierarchy: adding
//! a kind means adding a variant here and nowhere else. All kinds share the
//! single [`NodeKind::execute`] capability over mutable graph state.

use crate::error::Result;
use crate::state::GraphState;
use futures::future::BoxFuture;
use relay_agent::Agent;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Node identifier, unique within a graph
pub type NodeId = String;

/// Default blackboard key a router writes its decision to
pub const DEFAULT_ROUTE_KEY: &str = "route";

/// Async side-effect step: takes the state, returns it transformed
pub type ToolFn = Arc<dyn Fn(GraphState) -> BoxFuture<'static, Result<GraphState>> + Send + Sync>;

/// Builds the agent prompt from the current state
pub type InputBuilder = Arc<dyn Fn(&GraphState) -> String + Send + Sync>;

/// Computes a route string from the current state
pub type RouteFn = Arc<dyn Fn(&GraphState) -> Result<String> + Send + Sync>;

/// The closed set of node kinds
#[derive(Clone)]
pub enum NodeKind {
    /// Side-effect step over the graph state
    Tool(ToolFn),

    /// Invokes the agent loop; the textual output lands in
    /// `state.data[output_key]` and `state.output`
    Agent {
        agent: Arc<Agent>,
        input: InputBuilder,
        output_key: String,
    },

    /// Writes a route string to `state.data[route_key]` for edge conditions
    Router { route: RouteFn, route_key: String },
}

impl NodeKind {
    /// Convenience constructor for tool nodes over an async closure
    pub fn tool<F>(f: F) -> Self
    where
        F: Fn(GraphState) -> BoxFuture<'static, Result<GraphState>> + Send + Sync + 'static,
    {
        NodeKind::Tool(Arc::new(f))
    }

    /// Convenience constructor for router nodes with the default route key
    pub fn router<F>(f: F) -> Self
    where
        F: Fn(&GraphState) -> Result<String> + Send + Sync + 'static,
    {
        NodeKind::Router {
            route: Arc::new(f),
            route_key: DEFAULT_ROUTE_KEY.to_string(),
        }
    }

    pub async fn execute(&self, ctx: &CancellationToken, state: &mut GraphState) -> Result<()> {
        match self {
            NodeKind::Tool(f) => {
                let next = f(std::mem::take(state)).await?;
                *state = next;
                Ok(())
            }
            NodeKind::Agent {
                agent,
                input,
                output_key,
            } => {
                let prompt = input(state);
                let result = agent
                    .run_with_history(ctx, &state.run_id, &state.session_id, Vec::new(), &prompt)
                    .await?;
                state
                    .data
                    .insert(output_key.clone(), serde_json::Value::String(result.output.clone()));
                state.output = result.output;
                Ok(())
            }
            NodeKind::Router { route, route_key } => {
                let decision = route(state)?;
                state
                    .data
                    .insert(route_key.clone(), serde_json::Value::String(decision));
                Ok(())
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Tool(_) => "tool",
            NodeKind::Agent { .. } => "agent",
            NodeKind::Router { .. } => "router",
        }
    }
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// A named node
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tool_node_mutates_state() {
        let node = NodeKind::tool(|mut state| {
            Box::pin(async move {
                let upper = state.input.to_uppercase();
                state.set("prompt", upper);
                Ok(state)
            })
        });

        let mut state = GraphState::new("r1", "s1", "hello");
        node.execute(&CancellationToken::new(), &mut state)
            .await
            .unwrap();
        assert_eq!(state.get_str("prompt").unwrap(), "HELLO");
        assert_eq!(state.run_id, "r1");
    }

    #[tokio::test]
    async fn test_router_writes_route_key() {
        let node = NodeKind::router(|state| {
            Ok(if state.input.contains('a') {
                "left".to_string()
            } else {
                "right".to_string()
            })
        });

        let mut state = GraphState::new("r1", "s1", "abc");
        node.execute(&CancellationToken::new(), &mut state)
            .await
            .unwrap();
        assert_eq!(state.get_str(DEFAULT_ROUTE_KEY).unwrap(), "left");
    }
}
