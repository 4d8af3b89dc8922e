//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like
//! in memory. A [`WorkflowGraph`] is what gets serialised into the JSONB
//! `definition` column of the `workflows` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    /// Maps to a step type registered in the `StepRegistry`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Display label. Template references use it when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Step configuration; string values may embed `{{Node.field}}` references.
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            config: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Name used to address this node from a template reference.
    pub fn reference_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed edge: `target` depends on `source` having completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self { source: source.into(), target: target.into() }
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// Nodes in declaration order plus the edges between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete, stored workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub graph: WorkflowGraph,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(team_id: Uuid, name: impl Into<String>, graph: WorkflowGraph) -> Self {
        Self {
            id: Uuid::new_v4(),
            team_id,
            name: name.into(),
            graph,
            created_at: Utc::now(),
        }
    }
}

impl TryFrom<db::WorkflowRow> for Workflow {
    type Error = serde_json::Error;

    fn try_from(row: db::WorkflowRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            team_id: row.team_id,
            name: row.name,
            graph: serde_json::from_value(row.definition)?,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graph_deserializes_from_stored_definition() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "nodes": [
                { "id": "fetch", "type": "draft" },
                { "id": "send", "type": "email", "name": "Send", "config": { "body": "{{fetch.text}}" } }
            ],
            "edges": [ { "source": "fetch", "target": "send" } ]
        }))
        .unwrap();

        assert_eq!(graph.nodes[0].reference_name(), "fetch");
        assert_eq!(graph.nodes[1].reference_name(), "Send");
        assert_eq!(graph.nodes[1].config["body"], "{{fetch.text}}");
        assert_eq!(graph.edges, vec![Edge::new("fetch", "send")]);
    }

    #[test]
    fn workflow_row_with_bad_definition_is_rejected() {
        let row = db::WorkflowRow {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            name: "broken".into(),
            definition: json!({ "nodes": "not-a-list" }),
            created_at: Utc::now(),
        };
        assert!(Workflow::try_from(row).is_err());
    }
}
