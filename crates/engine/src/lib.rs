//! `engine` crate — domain models, the graph compiler, redaction, and the
//! execution engine.

pub mod models;
pub mod error;
pub mod template;
pub mod binding;
pub mod dag;
pub mod validate;
pub mod compiler;
pub mod codegen;
pub mod redact;
pub mod state;
pub mod tracker;
pub mod executor;

pub use models::{Edge, Node, Workflow, WorkflowGraph};
pub use error::{AccessError, EngineError, GraphValidationError, Violation};
pub use validate::{validate, ValidGraph};
pub use compiler::{compile, compile_graph, CompiledNode, CompiledProgram, Stage};
pub use codegen::generate;
pub use redact::{redact, REDACTED};
pub use state::{derive_status, RunState};
pub use tracker::{ExecutionLogs, ExecutionTracker, LogHandle, NodeStatusEntry, NodeStatusSummary};
pub use executor::{ExecutionReport, ExecutorConfig, WorkflowExecutor};


/// Checked-in output of `generate`, compiled with the test build.
#[cfg(test)]
#[path = "../tests/fixtures/newsletter.rs"]
mod generated_newsletter;
