//! Graph workflow engine for the relay runtime
//!
//! Graphs are directed node graphs with declaration-ordered conditional
//! edges. Execution checkpoints after every node, so a failed run resumes
//! from the last successful node instead of starting over.
//!
//! # Example
//!
//! ```
//! use relay_graph::{GraphBuilder, NodeKind};
//!
//! let graph = GraphBuilder::new("pipeline")
//!     .node("first", NodeKind::tool(|mut state| Box::pin(async move {
//!         state.set("seen", true);
//!         Ok(state)
//!     })))
//!     .node("last", NodeKind::tool(|mut state| Box::pin(async move {
//!         state.output = "done".to_string();
//!         Ok(state)
//!     })))
//!     .start("first")
//!     .edge("first", "last")
//!     .terminal("last")
//!     .build()
//!     .compile()
//!     .unwrap();
//! assert_eq!(graph.node_count(), 2);
//! ```

pub mod builder;
pub mod error;
pub mod executor;
pub mod file;
pub mod graph;
pub mod node;
pub mod state;

pub use builder::GraphBuilder;
pub use error::{GraphError, Result};
pub use executor::{GraphExecutor, GraphRunResult, Snapshot};
pub use file::{build_graph, parse_graph_file, render_template, GraphFile};
pub use graph::{CompiledGraph, Edge, EdgeCondition, Graph};
pub use node::{InputBuilder, Node, NodeId, NodeKind, RouteFn, ToolFn, DEFAULT_ROUTE_KEY};
pub use state::GraphState;
