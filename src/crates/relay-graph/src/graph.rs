//! Graph structure, edges and compile-time validation
//!
//! A graph is a set of named nodes plus declaration-ordered edges with
//! optional conditions. Compilation validates the structure and freezes it
//! into a [`CompiledGraph`] the executor can traverse.

use crate::error::{GraphError, Result};
use crate::node::{Node, NodeId};
use crate::state::GraphState;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Edge condition; an edge without one always matches
#[derive(Clone)]
pub enum EdgeCondition {
    /// Matches when `state.data[key]` equals the literal value
    Equals { key: String, value: serde_json::Value },
    /// Arbitrary predicate over the state
    Custom(Arc<dyn Fn(&GraphState) -> bool + Send + Sync>),
}

impl EdgeCondition {
    pub fn equals(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        EdgeCondition::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, state: &GraphState) -> bool {
        match self {
            EdgeCondition::Equals { key, value } => state.data.get(key) == Some(value),
            EdgeCondition::Custom(f) => f(state),
        }
    }
}

impl std::fmt::Debug for EdgeCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeCondition::Equals { key, value } => write!(f, "equals({} = {})", key, value),
            EdgeCondition::Custom(_) => f.write_str("custom"),
        }
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub condition: Option<EdgeCondition>,
}

/// Mutable graph under construction; see [`GraphBuilder`]
///
/// [`GraphBuilder`]: crate::builder::GraphBuilder
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    pub(crate) nodes: HashMap<NodeId, Node>,
    /// Declaration order is authoritative for edge selection
    pub(crate) edges: Vec<Edge>,
    pub(crate) start: NodeId,
    /// Nodes allowed to have no outgoing edge
    pub(crate) terminals: HashSet<NodeId>,
    pub(crate) allow_cycles: bool,
}

impl Graph {
    /// Validate and freeze the graph
    ///
    /// Checks: the start node exists, every edge endpoint exists, every
    /// node that is not a designated terminal has at least one outgoing
    /// edge, and the graph is acyclic unless cycles were enabled. Failures
    /// name the offending identifier.
    pub fn compile(self) -> Result<CompiledGraph> {
        if self.start.is_empty() {
            return Err(GraphError::Validation("no start node set".to_string()));
        }
        if !self.nodes.contains_key(&self.start) {
            return Err(GraphError::Validation(format!(
                "start node '{}' does not exist",
                self.start
            )));
        }

        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(GraphError::Validation(format!(
                    "edge source '{}' does not exist",
                    edge.from
                )));
            }
            if !self.nodes.contains_key(&edge.to) {
                return Err(GraphError::Validation(format!(
                    "edge target '{}' does not exist",
                    edge.to
                )));
            }
        }

        for terminal in &self.terminals {
            if !self.nodes.contains_key(terminal) {
                return Err(GraphError::Validation(format!(
                    "terminal node '{}' does not exist",
                    terminal
                )));
            }
        }

        let with_outgoing: HashSet<&NodeId> = self.edges.iter().map(|e| &e.from).collect();
        for id in self.nodes.keys() {
            if !with_outgoing.contains(id) && !self.terminals.contains(id) {
                return Err(GraphError::Validation(format!(
                    "node '{}' has no outgoing edge and is not a terminal",
                    id
                )));
            }
        }

        if !self.allow_cycles {
            self.check_acyclic()?;
        }

        Ok(CompiledGraph { graph: self })
    }

    /// Depth-first cycle detection over all edges
    fn check_acyclic(&self) -> Result<()> {
        let mut adjacency: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for edge in &self.edges {
            adjacency.entry(&edge.from).or_default().push(&edge.to);
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<&NodeId, Mark> = HashMap::new();
        let mut stack: Vec<(&NodeId, usize)> = Vec::new();

        for root in self.nodes.keys() {
            if marks.contains_key(root) {
                continue;
            }
            stack.push((root, 0));
            marks.insert(root, Mark::Visiting);

            while let Some((node, next_child)) = stack.pop() {
                let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if next_child < children.len() {
                    stack.push((node, next_child + 1));
                    let child = children[next_child];
                    match marks.get(child) {
                        Some(Mark::Visiting) => {
                            return Err(GraphError::Validation(format!(
                                "cycle detected through node '{}'",
                                child
                            )));
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(child, Mark::Visiting);
                            stack.push((child, 0));
                        }
                    }
                } else {
                    marks.insert(node, Mark::Done);
                }
            }
        }
        Ok(())
    }
}

/// Validated, executable graph
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    graph: Graph,
}

impl CompiledGraph {
    pub fn name(&self) -> &str {
        &self.graph.name
    }

    pub fn start(&self) -> &NodeId {
        &self.graph.start
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.graph.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.nodes.len()
    }

    /// Select the outgoing edge for `from` against the current state
    ///
    /// Edges are evaluated in declaration order; the first whose condition
    /// matches (or that has no condition) wins. `None` means the run
    /// terminates here.
    pub fn select_edge(&self, from: &str, state: &GraphState) -> Option<&Edge> {
        self.graph
            .edges
            .iter()
            .filter(|e| e.from == from)
            .find(|e| e.condition.as_ref().map_or(true, |c| c.matches(state)))
    }
}
