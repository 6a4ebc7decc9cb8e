//! Declarative JSON graph definitions
//!
//! A graph file is `{name, start, terminals, nodes[], edges[]}` where each
//! node declares a `kind`: `noop`, `set`, `template`, `agent`, `output` or
//! `router_json_key`. Templates substitute `{{token}}` over
//! `input|output|runId|sessionId|data.KEY`. The compiler applies the same
//! validation as programmatically built graphs.

use crate::builder::GraphBuilder;
use crate::error::{GraphError, Result};
use crate::graph::{EdgeCondition, Graph};
use crate::node::{NodeKind, DEFAULT_ROUTE_KEY};
use crate::state::GraphState;
use relay_agent::Agent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Top-level graph file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphFile {
    pub name: String,
    pub start: String,
    #[serde(default)]
    pub terminals: Vec<String>,
    #[serde(default)]
    pub allow_cycles: bool,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

/// A node declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeDefKind,
}

/// Declarative node kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDefKind {
    /// Does nothing; useful as a join point
    Noop,
    /// Sets `data[key]` to a literal value
    Set { key: String, value: serde_json::Value },
    /// Renders a template into `data[key]`
    Template { key: String, template: String },
    /// Invokes the agent loop; `prompt` is a template, default `{{input}}`
    Agent {
        output_key: String,
        #[serde(default)]
        prompt: Option<String>,
    },
    /// Renders a template into the run output
    Output { template: String },
    /// Routes on whether a JSON key exists in the run input
    RouterJsonKey {
        check_key: String,
        exists_value: String,
        missing_value: String,
        #[serde(default)]
        route_key: Option<String>,
    },
}

/// An edge declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub when: Option<EdgeWhen>,
}

/// Edge condition forms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeWhen {
    Equals { key: String, value: serde_json::Value },
}

/// Substitute `{{token}}` occurrences against the state
///
/// Tokens: `input`, `output`, `runId`, `sessionId` and `data.KEY`. Unknown
/// tokens render as the empty string. Non-string data values render as
/// their JSON encoding.
pub fn render_template(template: &str, state: &GraphState) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let token = after[..close].trim();
                out.push_str(&resolve_token(token, state));
                rest = &after[close + 2..];
            }
            None => {
                // unterminated token, emit verbatim
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_token(token: &str, state: &GraphState) -> String {
    match token {
        "input" => state.input.clone(),
        "output" => state.output.clone(),
        "runId" => state.run_id.clone(),
        "sessionId" => state.session_id.clone(),
        _ => match token.strip_prefix("data.") {
            Some(key) => match state.data.get(key) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => String::new(),
            },
            None => String::new(),
        },
    }
}

/// Parse a graph file from JSON text
pub fn parse_graph_file(json: &str) -> Result<GraphFile> {
    serde_json::from_str(json).map_err(GraphError::Serialization)
}

/// Build a [`Graph`] from a parsed file
///
/// `agent` is required when the file contains agent nodes.
pub fn build_graph(file: &GraphFile, agent: Option<Arc<Agent>>) -> Result<Graph> {
    let mut builder = GraphBuilder::new(&file.name)
        .start(&file.start)
        .allow_cycles(file.allow_cycles);

    for terminal in &file.terminals {
        builder = builder.terminal(terminal);
    }

    for def in &file.nodes {
        let kind = build_node(&def.id, &def.kind, agent.as_ref())?;
        builder = builder.node(&def.id, kind);
    }

    for edge in &file.edges {
        builder = match &edge.when {
            Some(EdgeWhen::Equals { key, value }) => builder.edge_if(
                &edge.from,
                &edge.to,
                EdgeCondition::Equals {
                    key: key.clone(),
                    value: value.clone(),
                },
            ),
            None => builder.edge(&edge.from, &edge.to),
        };
    }

    Ok(builder.build())
}

fn build_node(id: &str, def: &NodeDefKind, agent: Option<&Arc<Agent>>) -> Result<NodeKind> {
    Ok(match def {
        NodeDefKind::Noop => NodeKind::tool(|state| Box::pin(async move { Ok(state) })),

        NodeDefKind::Set { key, value } => {
            let key = key.clone();
            let value = value.clone();
            NodeKind::tool(move |mut state| {
                let key = key.clone();
                let value = value.clone();
                Box::pin(async move {
                    state.data.insert(key, value);
                    Ok(state)
                })
            })
        }

        NodeDefKind::Template { key, template } => {
            let key = key.clone();
            let template = template.clone();
            NodeKind::tool(move |mut state| {
                let key = key.clone();
                let template = template.clone();
                Box::pin(async move {
                    let rendered = render_template(&template, &state);
                    state.data.insert(key, serde_json::Value::String(rendered));
                    Ok(state)
                })
            })
        }

        NodeDefKind::Agent { output_key, prompt } => {
            let agent = agent
                .ok_or_else(|| {
                    GraphError::Validation(format!("node '{}' needs an agent, none configured", id))
                })?
                .clone();
            let prompt = prompt.clone().unwrap_or_else(|| "{{input}}".to_string());
            NodeKind::Agent {
                agent,
                input: Arc::new(move |state| render_template(&prompt, state)),
                output_key: output_key.clone(),
            }
        }

        NodeDefKind::Output { template } => {
            let template = template.clone();
            NodeKind::tool(move |mut state| {
                let template = template.clone();
                Box::pin(async move {
                    let rendered = render_template(&template, &state);
                    state.output = rendered;
                    Ok(state)
                })
            })
        }

        NodeDefKind::RouterJsonKey {
            check_key,
            exists_value,
            missing_value,
            route_key,
        } => {
            let check_key = check_key.clone();
            let exists_value = exists_value.clone();
            let missing_value = missing_value.clone();
            NodeKind::Router {
                route: Arc::new(move |state| {
                    let exists = serde_json::from_str::<serde_json::Value>(&state.input)
                        .ok()
                        .and_then(|v| v.as_object().map(|o| o.contains_key(&check_key)))
                        .unwrap_or(false);
                    Ok(if exists {
                        exists_value.clone()
                    } else {
                        missing_value.clone()
                    })
                }),
                route_key: route_key.clone().unwrap_or_else(|| DEFAULT_ROUTE_KEY.to_string()),
            }
        }
    })
}
