//! Node-level error type.

use thiserror::Error;

/// Errors raised while building or querying the step registry.
///
/// A step's own failure is never a `NodeError`; it is reported through
/// [`crate::StepResult::Failure`] so the engine can record it against the node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// No step is registered under this type key.
    #[error("unknown step type: '{0}'")]
    NotFound(String),

    /// The same step type was registered twice.
    #[error("step type '{0}' is already registered")]
    DuplicateStepType(String),
}
