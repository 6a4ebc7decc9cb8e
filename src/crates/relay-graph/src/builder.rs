//! Fluent graph construction

use crate::graph::{Edge, EdgeCondition, Graph};
use crate::node::{InputBuilder, Node, NodeId, NodeKind, RouteFn, DEFAULT_ROUTE_KEY};
use relay_agent::Agent;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Builder for [`Graph`]
///
/// ```
/// use relay_graph::{GraphBuilder, NodeKind};
///
/// let graph = GraphBuilder::new("shout")
///     .node("prepare", NodeKind::tool(|mut state| Box::pin(async move {
///         let upper = state.input.to_uppercase();
///         state.set("prompt", upper);
///         Ok(state)
///     })))
///     .start("prepare")
///     .terminal("prepare")
///     .build()
///     .compile()
///     .unwrap();
/// assert_eq!(graph.name(), "shout");
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    name: String,
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
    start: NodeId,
    terminals: HashSet<NodeId>,
    allow_cycles: bool,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a node; replaces any previous node of the same id
    pub fn node(mut self, id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        self.nodes.insert(id.clone(), Node { id, kind });
        self
    }

    /// Add an agent node writing its output under `output_key`
    pub fn agent_node(
        self,
        id: impl Into<String>,
        agent: Arc<Agent>,
        input: InputBuilder,
        output_key: impl Into<String>,
    ) -> Self {
        self.node(
            id,
            NodeKind::Agent {
                agent,
                input,
                output_key: output_key.into(),
            },
        )
    }

    /// Add a router node writing its decision under `route_key`
    pub fn router_node(
        self,
        id: impl Into<String>,
        route: RouteFn,
        route_key: Option<String>,
    ) -> Self {
        self.node(
            id,
            NodeKind::Router {
                route,
                route_key: route_key.unwrap_or_else(|| DEFAULT_ROUTE_KEY.to_string()),
            },
        )
    }

    pub fn start(mut self, id: impl Into<String>) -> Self {
        self.start = id.into();
        self
    }

    /// Designate a node as a terminal (allowed to have no outgoing edge)
    pub fn terminal(mut self, id: impl Into<String>) -> Self {
        self.terminals.insert(id.into());
        self
    }

    pub fn allow_cycles(mut self, allow: bool) -> Self {
        self.allow_cycles = allow;
        self
    }

    /// Add an unconditional edge
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    /// Add a conditional edge; conditions are tried in declaration order
    pub fn edge_if(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: Some(condition),
        });
        self
    }

    pub fn build(self) -> Graph {
        Graph {
            name: self.name,
            nodes: self.nodes,
            edges: self.edges,
            start: self.start,
            terminals: self.terminals,
            allow_cycles: self.allow_cycles,
        }
    }
}
