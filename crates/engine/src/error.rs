//! Engine-level error types.

use thiserror::Error;

// ------ Validation errors ------

/// One problem found in a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    /// Kahn's algorithm left these nodes unresolved.
    #[error("workflow graph contains a cycle through: {}", .nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    #[error("node '{node_id}' has unknown step type '{step_type}'")]
    UnknownStepType { node_id: String, step_type: String },

    #[error("node '{node_id}' is missing required input '{field}'")]
    MissingInput { node_id: String, field: String },

    /// `{{...}}` that is not of the form `{{Name.field}}`.
    #[error("node '{node_id}' has a malformed template reference '{reference}'")]
    MalformedReference { node_id: String, reference: String },

    #[error("node '{node_id}' references '{reference}' but no node is named '{name}'")]
    UnknownTemplateNode {
        node_id: String,
        reference: String,
        name: String,
    },

    #[error("node '{node_id}' references '{reference}' but several nodes are named '{name}'")]
    AmbiguousTemplateNode {
        node_id: String,
        reference: String,
        name: String,
    },

    /// The referenced node is not upstream of the referencing node.
    #[error("node '{node_id}' references '{reference}' but does not depend on node '{source_node}'")]
    NotADependency {
        node_id: String,
        reference: String,
        source_node: String,
    },
}

impl Violation {
    /// The node an editor should highlight, if the violation belongs to one.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::DuplicateNodeId(id) => Some(id.as_str()),
            Self::UnknownNodeReference { .. } | Self::CycleDetected { .. } => None,
            Self::UnknownStepType { node_id, .. }
            | Self::MissingInput { node_id, .. }
            | Self::MalformedReference { node_id, .. }
            | Self::UnknownTemplateNode { node_id, .. }
            | Self::AmbiguousTemplateNode { node_id, .. }
            | Self::NotADependency { node_id, .. } => Some(node_id.as_str()),
        }
    }
}

/// Every violation found while validating a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("workflow graph is invalid: {}", .violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct GraphValidationError {
    pub violations: Vec<Violation>,
}

// ------ Engine errors ------

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] GraphValidationError),

    /// The stored definition does not deserialize into a graph.
    #[error("invalid workflow definition: {0}")]
    Definition(#[from] serde_json::Error),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

// ------ Read-path errors ------

/// Outcomes of the execution read path other than success.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("execution not found")]
    NotFound,

    /// The execution's workflow belongs to another team.
    #[error("execution belongs to another team")]
    Forbidden,

    #[error("database error: {0}")]
    Database(db::DbError),
}

impl From<db::DbError> for AccessError {
    fn from(err: db::DbError) -> Self {
        match err {
            db::DbError::NotFound => Self::NotFound,
            other => Self::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_violation() {
        let err = GraphValidationError {
            violations: vec![
                Violation::DuplicateNodeId("a".into()),
                Violation::CycleDetected { nodes: vec!["b".into(), "c".into()] },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("duplicate node ID: 'a'"));
        assert!(msg.contains("cycle through: b, c"));
    }

    #[test]
    fn db_not_found_maps_to_access_not_found() {
        assert!(matches!(AccessError::from(db::DbError::NotFound), AccessError::NotFound));
    }
}
