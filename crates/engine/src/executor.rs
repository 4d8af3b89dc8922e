//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Compiles the graph (validation + stage grouping).
//! 2. Creates the execution row and marks it `running`.
//! 3. Dispatches each stage's nodes concurrently, one tokio task per node,
//!    binding inputs against the outputs of earlier stages.
//! 4. Leaves dependents of a failed node `pending`; other branches continue.
//! 5. Logs every attempt through the [`ExecutionTracker`] and re-derives the
//!    overall status after each stage.
//!
//! An external stop (the execution row turning terminal) is checked before
//! each stage. Nodes already in flight finish and log normally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinError;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use db::{ExecutionRow, ExecutionStore, RunStatus};
use nodes::{CredentialsProvider, NoCredentials, RuntimeContext, StepRegistry, StepResult};

use crate::{
    compiler::{compile_graph, CompiledProgram},
    error::{EngineError, GraphValidationError},
    models::{Workflow, WorkflowGraph},
    state::RunState,
    tracker::{ExecutionTracker, NodeStatusEntry},
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of times a failed log write will be retried.
    pub max_log_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_log_retries: 3,
            retry_base_delay: Duration::from_millis(50),
        }
    }
}

// ---------------------------------------------------------------------------
// Output of a completed execution
// ---------------------------------------------------------------------------

/// The result of running a full workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub status: RunStatus,
    /// Final status of every node, in program order.
    pub node_statuses: Vec<NodeStatusEntry>,
    /// `data` of every node that succeeded.
    pub outputs: HashMap<String, Value>,
}

impl ExecutionReport {
    pub fn node_status(&self, node_id: &str) -> Option<RunStatus> {
        self.node_statuses
            .iter()
            .find(|e| e.node_id == node_id)
            .map(|e| e.status)
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Orchestrates workflow runs against a shared, read-only step registry.
///
/// Construct one executor per process and share it behind an `Arc`.
pub struct WorkflowExecutor {
    registry: Arc<StepRegistry>,
    tracker: ExecutionTracker,
    credentials: Arc<dyn CredentialsProvider>,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        registry: Arc<StepRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            tracker: ExecutionTracker::new(store, config),
            credentials: Arc::new(NoCredentials),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Validate and compile `graph` against this executor's registry.
    ///
    /// # Errors
    /// Every violation found in the graph.
    pub fn compile(&self, graph: &WorkflowGraph) -> Result<CompiledProgram, GraphValidationError> {
        compile_graph(graph, &self.registry)
    }

    /// Create the execution row for a run of `workflow_id`.
    ///
    /// # Errors
    /// Returns `EngineError::Database` if the row cannot be written.
    pub async fn start(&self, workflow_id: Uuid) -> Result<ExecutionRow, EngineError> {
        Ok(self.tracker.create_execution(workflow_id).await?)
    }

    /// Compile, start, and drive `workflow` to completion.
    ///
    /// # Errors
    /// Returns `EngineError` for validation failures or when the execution
    /// row cannot be created. Node failures are part of the report, not
    /// errors.
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    pub async fn run(&self, workflow: &Workflow) -> Result<ExecutionReport, EngineError> {
        let program = self.compile(&workflow.graph)?;
        let execution = self.start(workflow.id).await?;
        Ok(self.drive(execution.id, workflow.id, &program).await)
    }

    /// Run every stage of `program` for an already created execution.
    #[instrument(skip(self, program))]
    pub async fn drive(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
        program: &CompiledProgram,
    ) -> ExecutionReport {
        info!(
            "executing {} node(s) in {} stage(s)",
            program.len(),
            program.stages().len()
        );

        let mut run = RunState::new(program.node_ids());
        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut stopped = false;

        self.tracker.refresh_status(execution_id, &run, false).await;

        for stage in program.stages() {
            if self.tracker.is_stopped(execution_id).await {
                warn!(stage = stage.index, "execution stopped; not dispatching further stages");
                stopped = true;
                break;
            }

            // ------------------------------------------------------------------
            // Dispatch every ready node of the stage.
            // ------------------------------------------------------------------
            let mut dispatched = Vec::new();
            for node in program.stage_nodes(stage) {
                let ready = node
                    .dependencies
                    .iter()
                    .all(|dep| run.status(dep) == Some(RunStatus::Success));
                if !ready {
                    info!(node_id = %node.id, "upstream did not succeed; node stays pending");
                    continue;
                }
                if let Err(e) = run.begin(&node.id) {
                    warn!("{e}");
                    continue;
                }

                let input = node.resolve_input(&outputs);
                let log = self
                    .tracker
                    .log_start(execution_id, node, &Value::Object(input.clone()))
                    .await;

                let ctx = RuntimeContext::new(
                    workflow_id,
                    execution_id,
                    node.id.clone(),
                    Arc::clone(&self.credentials),
                )
                .with_integration(node.integration_id.clone());

                let task = match self.registry.resolve(&node.step_type) {
                    Ok(descriptor) => {
                        let step = descriptor.step();
                        tokio::spawn(async move { step.invoke(input, &ctx).await })
                    }
                    Err(e) => {
                        let message = e.to_string();
                        tokio::spawn(async move { StepResult::failure(message) })
                    }
                };
                dispatched.push((node, log, task));
            }

            // ------------------------------------------------------------------
            // Wait for the whole stage, then record outcomes.
            // ------------------------------------------------------------------
            let (pending, tasks): (Vec<_>, Vec<_>) = dispatched
                .into_iter()
                .map(|(node, log, task)| ((node, log), task))
                .unzip();
            let results = join_all(tasks).await;

            for ((node, log), joined) in pending.into_iter().zip(results) {
                let result = joined.unwrap_or_else(|e| {
                    let message = panic_message(e);
                    error!(node_id = %node.id, "step faulted: {message}");
                    StepResult::failure(format!("step panicked: {message}"))
                });

                match &result {
                    StepResult::Success { data } => {
                        info!(node_id = %node.id, "node succeeded");
                        outputs.insert(node.id.clone(), data.clone());
                    }
                    StepResult::Failure { error } => {
                        warn!(node_id = %node.id, "node failed: {error}");
                    }
                }

                if let Err(e) = run.finish(&node.id, result.is_success()) {
                    warn!("{e}");
                }
                self.tracker
                    .log_complete(execution_id, &node.id, &log, &result)
                    .await;
            }

            self.tracker.refresh_status(execution_id, &run, false).await;
        }

        let derived = self.tracker.refresh_status(execution_id, &run, true).await;
        // A stop that landed during the last stage is only visible on the row.
        let status = match self.tracker.persisted_status(execution_id).await {
            Some(persisted) if persisted.is_terminal() => persisted,
            _ if stopped => RunStatus::Error,
            _ => derived,
        };
        info!(%status, "execution finished");

        ExecutionReport {
            execution_id,
            status,
            node_statuses: run
                .snapshot()
                .into_iter()
                .map(|(node_id, status)| NodeStatusEntry { node_id, status })
                .collect(),
            outputs,
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
