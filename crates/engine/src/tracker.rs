//! Execution tracking: log persistence, overall status, and the read path.
//!
//! Log writes are best-effort. A failed write is retried with exponential
//! back-off, then reported with `warn!` and dropped; it never fails the run.
//! Snapshots are redacted before they are written and again when served.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use db::{
    DbError, ExecutionLogRow, ExecutionRow, ExecutionStore, LogCompletion, LogTarget,
    NewExecutionLog, RunStatus,
};
use nodes::StepResult;

use crate::{
    compiler::CompiledNode,
    error::AccessError,
    executor::ExecutorConfig,
    redact::{redact, redact_text},
    state::{derive_status, RunState},
};

// ---------------------------------------------------------------------------
// Log handles
// ---------------------------------------------------------------------------

/// Returned by [`ExecutionTracker::log_start`], threaded into
/// [`ExecutionTracker::log_complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHandle {
    /// `None` when the start row could not be written.
    pub log_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
}

impl LogHandle {
    pub fn logged(&self) -> bool {
        self.log_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// Read-path views
// ---------------------------------------------------------------------------

/// An execution with every node attempt, snapshots redacted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogs {
    pub execution: ExecutionRow,
    pub logs: Vec<ExecutionLogRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusEntry {
    pub node_id: String,
    pub status: RunStatus,
}

/// Overall status plus the latest attempt's status per node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusSummary {
    pub status: RunStatus,
    pub node_statuses: Vec<NodeStatusEntry>,
}

// ---------------------------------------------------------------------------
// ExecutionTracker
// ---------------------------------------------------------------------------

pub struct ExecutionTracker {
    store: Arc<dyn ExecutionStore>,
    config: ExecutorConfig,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn ExecutionStore>, config: ExecutorConfig) -> Self {
        Self { store, config }
    }

    /// Create the execution row (`pending`).
    pub async fn create_execution(&self, workflow_id: Uuid) -> Result<ExecutionRow, DbError> {
        self.store.create_execution(workflow_id).await
    }

    /// Persist a `running` row for `node` with its redacted input.
    #[instrument(skip(self, node, input), fields(node_id = %node.id))]
    pub async fn log_start(
        &self,
        execution_id: Uuid,
        node: &CompiledNode,
        input: &Value,
    ) -> LogHandle {
        let started_at = Utc::now();
        let entry = NewExecutionLog {
            execution_id,
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            node_type: node.step_type.clone(),
            input: redact(input),
            started_at,
        };

        let store = Arc::clone(&self.store);
        let written = self
            .with_retry("log start", move || {
                let store = Arc::clone(&store);
                let entry = entry.clone();
                async move { store.insert_log(entry).await }
            })
            .await;

        match written {
            Ok(row) => LogHandle {
                log_id: Some(row.id),
                started_at: row.started_at,
            },
            Err(e) => {
                warn!(%execution_id, node_id = %node.id, "could not record node start: {e}");
                LogHandle { log_id: None, started_at }
            }
        }
    }

    /// Record the outcome of a node attempt. Returns whether it was persisted.
    #[instrument(skip(self, handle, result))]
    pub async fn log_complete(
        &self,
        execution_id: Uuid,
        node_id: &str,
        handle: &LogHandle,
        result: &StepResult,
    ) -> bool {
        let completion = match result {
            StepResult::Success { data } => LogCompletion {
                status: RunStatus::Success,
                output: Some(redact(data)),
                error: None,
                finished_at: Utc::now(),
            },
            StepResult::Failure { error } => LogCompletion {
                status: RunStatus::Error,
                output: None,
                error: Some(redact_text(error).into_owned()),
                finished_at: Utc::now(),
            },
        };

        let by_node = LogTarget::Node {
            execution_id,
            node_id: node_id.to_owned(),
        };
        let mut outcome = match handle.log_id {
            Some(id) => self.complete(LogTarget::Id(id), completion.clone()).await,
            None => Err(DbError::NotFound),
        };
        if matches!(outcome, Err(DbError::NotFound)) {
            debug!(%execution_id, node_id, "locating log row by node");
            outcome = self.complete(by_node, completion).await;
        }

        match outcome {
            Ok(()) => true,
            Err(e) => {
                warn!(%execution_id, node_id, "could not record node completion: {e}");
                false
            }
        }
    }

    async fn complete(&self, target: LogTarget, completion: LogCompletion) -> Result<(), DbError> {
        let store = Arc::clone(&self.store);
        self.with_retry("log completion", move || {
            let store = Arc::clone(&store);
            let target = target.clone();
            let completion = completion.clone();
            async move { store.complete_log(target, completion).await }
        })
        .await
    }

    /// Recompute overall status from the persisted logs and `run`, and write
    /// it to the execution row.
    ///
    /// Mid-run a terminal status is not written yet: the row becoming
    /// terminal is how an external stop is observed, and independent
    /// branches keep running after a failure. Readers still see `error`
    /// early through [`Self::node_statuses`].
    #[instrument(skip(self, run))]
    pub async fn refresh_status(&self, execution_id: Uuid, run: &RunState, finished: bool) -> RunStatus {
        let logged = match self.store.list_logs(execution_id).await {
            Ok(logs) => latest_per_node(&logs),
            Err(e) => {
                warn!(%execution_id, "could not re-scan logs: {e}");
                Vec::new()
            }
        };

        let merged = run.snapshot().into_iter().map(|(node_id, status)| {
            logged
                .iter()
                .find(|entry| entry.node_id == node_id)
                .map_or(status, |entry| most_advanced(status, entry.status))
        });
        let derived = derive_status(merged);

        let persisted = if finished { derived } else { RunStatus::Running };
        let store = Arc::clone(&self.store);
        let write = self
            .with_retry("execution status", move || {
                let store = Arc::clone(&store);
                async move { store.update_execution_status(execution_id, persisted, finished).await }
            })
            .await;
        match write {
            Ok(true) => debug!(%execution_id, status = %persisted, "execution status updated"),
            Ok(false) => debug!(%execution_id, "execution already terminal"),
            Err(e) => warn!(%execution_id, "could not update execution status: {e}"),
        }
        derived
    }

    /// Whether the execution row went terminal behind the executor's back.
    pub async fn is_stopped(&self, execution_id: Uuid) -> bool {
        self.persisted_status(execution_id)
            .await
            .is_some_and(|status| status.is_terminal())
    }

    /// Status currently stored on the execution row, if it can be read.
    pub async fn persisted_status(&self, execution_id: Uuid) -> Option<RunStatus> {
        match self.store.get_execution(execution_id).await {
            Ok(row) => Some(row.status),
            Err(e) => {
                warn!(%execution_id, "could not check execution status: {e}");
                None
            }
        }
    }

    /// External stop: marks the run `error`. Returns `false` when it had
    /// already finished.
    ///
    /// # Errors
    /// Not found, not owned by `team_id`, or a store failure.
    #[instrument(skip(self))]
    pub async fn stop(&self, execution_id: Uuid, team_id: Uuid) -> Result<bool, AccessError> {
        self.owned_execution(execution_id, team_id).await?;
        let stopped = self
            .store
            .update_execution_status(execution_id, RunStatus::Error, true)
            .await?;
        if stopped {
            warn!(%execution_id, "execution stopped by request");
        }
        Ok(stopped)
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Every attempt of the execution, redacted again on the way out.
    ///
    /// # Errors
    /// [`AccessError::NotFound`] for an unknown execution,
    /// [`AccessError::Forbidden`] when another team owns the workflow.
    pub async fn execution_logs(
        &self,
        execution_id: Uuid,
        team_id: Uuid,
    ) -> Result<ExecutionLogs, AccessError> {
        let mut execution = self.owned_execution(execution_id, team_id).await?;
        let logs: Vec<ExecutionLogRow> = self
            .store
            .list_logs(execution_id)
            .await?
            .into_iter()
            .map(redact_log)
            .collect();
        execution.status = effective_status(&execution, &latest_per_node(&logs));
        Ok(ExecutionLogs { execution, logs })
    }

    /// One status per node (latest attempt), in order of first appearance.
    ///
    /// # Errors
    /// Same as [`Self::execution_logs`].
    pub async fn node_statuses(
        &self,
        execution_id: Uuid,
        team_id: Uuid,
    ) -> Result<NodeStatusSummary, AccessError> {
        let execution = self.owned_execution(execution_id, team_id).await?;
        let node_statuses = latest_per_node(&self.store.list_logs(execution_id).await?);
        Ok(NodeStatusSummary {
            status: effective_status(&execution, &node_statuses),
            node_statuses,
        })
    }

    async fn owned_execution(
        &self,
        execution_id: Uuid,
        team_id: Uuid,
    ) -> Result<ExecutionRow, AccessError> {
        let execution = self.store.get_execution(execution_id).await?;
        let owner = self.store.workflow_team(execution.workflow_id).await?;
        if owner != team_id {
            return Err(AccessError::Forbidden);
        }
        Ok(execution)
    }

    // -----------------------------------------------------------------------
    // Internal: retry a store write with back-off.
    // -----------------------------------------------------------------------

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, DbError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let mut attempts = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),

                // Retrying cannot make a missing row appear.
                Err(DbError::NotFound) => return Err(DbError::NotFound),

                Err(e) => {
                    attempts += 1;
                    if attempts > self.config.max_log_retries {
                        return Err(e);
                    }

                    let delay = backoff_delay(self.config.retry_base_delay, attempts);

                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempts, self.config.max_log_retries, delay, e
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Upper bound on a single back-off sleep.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// `base * 2^(attempt - 1)`, capped at [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    base.checked_mul(factor).unwrap_or(MAX_RETRY_DELAY).min(MAX_RETRY_DELAY)
}

fn redact_log(mut log: ExecutionLogRow) -> ExecutionLogRow {
    log.input = redact(&log.input);
    log.output = log.output.as_ref().map(redact);
    log.error = log.error.as_deref().map(|e| redact_text(e).into_owned());
    log
}

/// Latest attempt per node, ordered by each node's first appearance.
fn latest_per_node(logs: &[ExecutionLogRow]) -> Vec<NodeStatusEntry> {
    let mut entries: Vec<NodeStatusEntry> = Vec::new();
    for log in logs {
        match entries.iter_mut().find(|e| e.node_id == log.node_id) {
            Some(entry) => entry.status = log.status,
            None => entries.push(NodeStatusEntry {
                node_id: log.node_id.clone(),
                status: log.status,
            }),
        }
    }
    entries
}

/// A terminal row is final; otherwise a failed node already means `error`.
fn effective_status(execution: &ExecutionRow, nodes: &[NodeStatusEntry]) -> RunStatus {
    if execution.status.is_terminal() {
        execution.status
    } else if nodes.iter().any(|n| n.status == RunStatus::Error) {
        RunStatus::Error
    } else {
        execution.status
    }
}

fn most_advanced(a: RunStatus, b: RunStatus) -> RunStatus {
    fn rank(s: RunStatus) -> u8 {
        match s {
            RunStatus::Pending => 0,
            RunStatus::Running => 1,
            RunStatus::Success | RunStatus::Error => 2,
        }
    }
    if rank(b) > rank(a) { b } else { a }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use db::{MemoryStore, WorkflowRow};
    use serde_json::json;

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            max_log_retries: 2,
            retry_base_delay: Duration::from_millis(1),
        }
    }

    fn node(id: &str) -> CompiledNode {
        CompiledNode {
            id: id.into(),
            name: id.to_uppercase(),
            step_type: "mock".into(),
            stage: 0,
            dependencies: vec![],
            inputs: BTreeMap::new(),
            integration_id: None,
        }
    }

    async fn setup() -> (Arc<MemoryStore>, ExecutionTracker, Uuid, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let team_id = Uuid::new_v4();
        let workflow_id = Uuid::new_v4();
        store
            .insert_workflow(WorkflowRow {
                id: workflow_id,
                team_id,
                name: "wf".into(),
                definition: json!({}),
                created_at: Utc::now(),
            })
            .await;
        let tracker = ExecutionTracker::new(store.clone(), config());
        let execution = tracker.create_execution(workflow_id).await.unwrap();
        (store, tracker, execution.id, team_id)
    }

    #[tokio::test]
    async fn start_and_complete_write_redacted_snapshots() {
        let (store, tracker, exec_id, _) = setup().await;

        let handle = tracker
            .log_start(exec_id, &node("a"), &json!({ "password": "pw", "q": "x" }))
            .await;
        assert!(handle.logged());

        let done = tracker
            .log_complete(
                exec_id,
                "a",
                &handle,
                &StepResult::success(json!({ "token": "t0k3n", "ok": true })),
            )
            .await;
        assert!(done);

        let logs = store.list_logs(exec_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].node_name, "A");
        assert_eq!(logs[0].status, RunStatus::Success);
        assert_eq!(logs[0].input, json!({ "password": "[REDACTED]", "q": "x" }));
        assert_eq!(logs[0].output, Some(json!({ "token": "[REDACTED]", "ok": true })));
        assert!(logs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn completion_falls_back_to_node_lookup() {
        let (store, tracker, exec_id, _) = setup().await;
        tracker.log_start(exec_id, &node("a"), &json!({})).await;

        let stale = LogHandle {
            log_id: Some(Uuid::new_v4()),
            started_at: Utc::now(),
        };
        assert!(tracker.log_complete(exec_id, "a", &stale, &StepResult::failure("nope")).await);

        let logs = store.list_logs(exec_id).await.unwrap();
        assert_eq!(logs[0].status, RunStatus::Error);
        assert_eq!(logs[0].error.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn failing_log_writes_are_retried_then_swallowed() {
        let (store, tracker, exec_id, _) = setup().await;
        store.set_log_writes_failing(true);

        let handle = tracker.log_start(exec_id, &node("a"), &json!({})).await;
        assert!(!handle.logged());
        // One attempt plus two retries.
        assert_eq!(store.rejected_log_writes(), 3);

        let done = tracker
            .log_complete(exec_id, "a", &handle, &StepResult::success(json!({})))
            .await;
        assert!(!done);
        assert_eq!(store.rejected_log_writes(), 6);
    }

    #[tokio::test]
    async fn long_retry_budgets_do_not_overflow_the_backoff() {
        let (store, _, exec_id, _) = setup().await;
        let tracker = ExecutionTracker::new(
            store.clone(),
            ExecutorConfig {
                max_log_retries: 40,
                retry_base_delay: Duration::ZERO,
            },
        );
        store.set_log_writes_failing(true);

        let task = tokio::spawn(async move {
            tracker.log_start(exec_id, &node("a"), &json!({})).await.logged()
        });
        assert_eq!(task.await.ok(), Some(false));
        assert_eq!(store.rejected_log_writes(), 41);
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let base = Duration::from_millis(50);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 40), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(Duration::from_secs(u64::MAX), 2), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn refresh_defers_terminal_status_until_finish() {
        let (store, tracker, exec_id, _) = setup().await;
        let mut run = RunState::new(["a".to_string(), "b".to_string()]);
        run.begin("a").unwrap();
        run.finish("a", false).unwrap();

        assert_eq!(tracker.refresh_status(exec_id, &run, false).await, RunStatus::Error);
        assert_eq!(store.get_execution(exec_id).await.unwrap().status, RunStatus::Running);

        assert_eq!(tracker.refresh_status(exec_id, &run, true).await, RunStatus::Error);
        let row = store.get_execution(exec_id).await.unwrap();
        assert_eq!(row.status, RunStatus::Error);
        assert!(row.finished_at.is_some());
    }

    #[tokio::test]
    async fn stop_is_observed_and_final() {
        let (_, tracker, exec_id, team_id) = setup().await;
        assert!(!tracker.is_stopped(exec_id).await);
        assert!(tracker.stop(exec_id, team_id).await.unwrap());
        assert!(tracker.is_stopped(exec_id).await);
        assert!(!tracker.stop(exec_id, team_id).await.unwrap());
    }

    #[tokio::test]
    async fn read_path_checks_ownership() {
        let (_, tracker, exec_id, _) = setup().await;
        assert!(matches!(
            tracker.execution_logs(exec_id, Uuid::new_v4()).await,
            Err(AccessError::Forbidden)
        ));
        assert!(matches!(
            tracker.node_statuses(Uuid::new_v4(), Uuid::new_v4()).await,
            Err(AccessError::NotFound)
        ));
    }

    #[tokio::test]
    async fn read_path_redacts_rows_written_before_redaction() {
        let (store, tracker, exec_id, team_id) = setup().await;
        let handle = tracker.log_start(exec_id, &node("a"), &json!({})).await;
        let mut row = store.list_logs(exec_id).await.unwrap().remove(0);
        row.input = json!({ "apiKey": "sk-abcdefghijklmnopqrstu", "url": "x?token=abc123" });
        row.output = Some(json!({ "header": "Bearer abcdefgh12345678" }));
        store.put_log(row).await;

        let view = tracker.execution_logs(exec_id, team_id).await.unwrap();
        assert_eq!(view.logs[0].id, handle.log_id.unwrap());
        assert_eq!(
            view.logs[0].input,
            json!({ "apiKey": "[REDACTED]", "url": "x?token=[REDACTED]" })
        );
        assert_eq!(view.logs[0].output, Some(json!({ "header": "Bearer [REDACTED]" })));
    }

    #[tokio::test]
    async fn summary_keeps_latest_attempt_per_node() {
        let (store, tracker, exec_id, team_id) = setup().await;
        store.update_execution_status(exec_id, RunStatus::Running, false).await.unwrap();
        for (id, ok) in [("a", false), ("b", true), ("a", true)] {
            let handle = tracker.log_start(exec_id, &node(id), &json!({})).await;
            let result = if ok {
                StepResult::success(json!({}))
            } else {
                StepResult::failure("x")
            };
            tracker.log_complete(exec_id, id, &handle, &result).await;
        }

        let summary = tracker.node_statuses(exec_id, team_id).await.unwrap();
        assert_eq!(
            summary.node_statuses,
            vec![
                NodeStatusEntry { node_id: "a".into(), status: RunStatus::Success },
                NodeStatusEntry { node_id: "b".into(), status: RunStatus::Success },
            ]
        );
        // Only the superseded attempt of `a` failed.
        assert_eq!(summary.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn failed_node_reads_as_error_before_the_row_is_final() {
        let (store, tracker, exec_id, team_id) = setup().await;
        store.update_execution_status(exec_id, RunStatus::Running, false).await.unwrap();
        let handle = tracker.log_start(exec_id, &node("a"), &json!({})).await;
        tracker
            .log_complete(exec_id, "a", &handle, &StepResult::failure("boom"))
            .await;

        let summary = tracker.node_statuses(exec_id, team_id).await.unwrap();
        assert_eq!(summary.status, RunStatus::Error);
        let view = tracker.execution_logs(exec_id, team_id).await.unwrap();
        assert_eq!(view.execution.status, RunStatus::Error);
    }
}
