//! In-process store with the same semantics as the Postgres tables.
//!
//! Backs the test suites and local runs. Log writes can be switched to fail
//! so callers can exercise their best-effort logging paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    DbError,
    models::{ExecutionLogRow, ExecutionRow, LogCompletion, LogTarget, NewExecutionLog, RunStatus, WorkflowRow},
    store::{ExecutionStore, WorkflowStore},
};

#[derive(Debug, Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowRow>,
    executions: HashMap<Uuid, ExecutionRow>,
    /// Insertion order doubles as start order.
    logs: Vec<ExecutionLogRow>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_log_writes: AtomicBool,
    rejected_log_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent log insert/complete fail with `Unavailable`.
    pub fn set_log_writes_failing(&self, failing: bool) {
        self.fail_log_writes.store(failing, Ordering::SeqCst);
    }

    /// Log writes refused while failing was switched on.
    pub fn rejected_log_writes(&self) -> usize {
        self.rejected_log_writes.load(Ordering::SeqCst)
    }

    /// Insert a workflow row with a caller-chosen id.
    pub async fn insert_workflow(&self, row: WorkflowRow) {
        self.tables.write().await.workflows.insert(row.id, row);
    }

    /// Overwrite a log row verbatim, bypassing the write path.
    pub async fn put_log(&self, row: ExecutionLogRow) {
        let mut tables = self.tables.write().await;
        match tables.logs.iter_mut().find(|l| l.id == row.id) {
            Some(existing) => *existing = row,
            None => tables.logs.push(row),
        }
    }

    fn check_log_writes(&self) -> Result<(), DbError> {
        if self.fail_log_writes.load(Ordering::SeqCst) {
            self.rejected_log_writes.fetch_add(1, Ordering::SeqCst);
            return Err(DbError::Unavailable("log writes are disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn create_workflow(
        &self,
        team_id: Uuid,
        name: &str,
        definition: Value,
    ) -> Result<WorkflowRow, DbError> {
        let row = WorkflowRow {
            id: Uuid::new_v4(),
            team_id,
            name: name.to_owned(),
            definition,
            created_at: Utc::now(),
        };
        self.tables.write().await.workflows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.tables
            .read()
            .await
            .workflows
            .get(&id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn list_workflows(&self, team_id: Uuid) -> Result<Vec<WorkflowRow>, DbError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<WorkflowRow> = tables
            .workflows
            .values()
            .filter(|w| w.team_id == team_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    /// Cascades to executions and their logs, like the foreign keys do.
    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        tables.workflows.remove(&id).ok_or(DbError::NotFound)?;

        let executions: Vec<Uuid> = tables
            .executions
            .values()
            .filter(|e| e.workflow_id == id)
            .map(|e| e.id)
            .collect();
        tables.executions.retain(|_, e| e.workflow_id != id);
        tables.logs.retain(|l| !executions.contains(&l.execution_id));
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_execution(&self, workflow_id: Uuid) -> Result<ExecutionRow, DbError> {
        let row = ExecutionRow {
            id: Uuid::new_v4(),
            workflow_id,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.tables.write().await.executions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError> {
        self.tables
            .read()
            .await
            .executions
            .get(&id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: RunStatus,
        finished: bool,
    ) -> Result<bool, DbError> {
        let mut tables = self.tables.write().await;
        let row = tables.executions.get_mut(&id).ok_or(DbError::NotFound)?;
        if row.status.is_terminal() {
            return Ok(false);
        }
        row.status = status;
        if finished {
            row.finished_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn insert_log(&self, log: NewExecutionLog) -> Result<ExecutionLogRow, DbError> {
        self.check_log_writes()?;
        let row = ExecutionLogRow {
            id: Uuid::new_v4(),
            execution_id: log.execution_id,
            node_id: log.node_id,
            node_name: log.node_name,
            node_type: log.node_type,
            status: RunStatus::Running,
            input: log.input,
            output: None,
            error: None,
            started_at: log.started_at,
            finished_at: None,
        };
        self.tables.write().await.logs.push(row.clone());
        Ok(row)
    }

    async fn complete_log(&self, target: LogTarget, completion: LogCompletion) -> Result<(), DbError> {
        self.check_log_writes()?;
        let mut tables = self.tables.write().await;
        let row = match &target {
            LogTarget::Id(id) => tables.logs.iter_mut().find(|l| l.id == *id),
            LogTarget::Node { execution_id, node_id } => tables
                .logs
                .iter_mut()
                .rev()
                .find(|l| l.execution_id == *execution_id && l.node_id == *node_id),
        }
        .ok_or(DbError::NotFound)?;

        row.status = completion.status;
        row.output = completion.output;
        row.error = completion.error;
        row.finished_at = Some(completion.finished_at);
        Ok(())
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
        Ok(self
            .tables
            .read()
            .await
            .logs
            .iter()
            .filter(|l| l.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn workflow_team(&self, workflow_id: Uuid) -> Result<Uuid, DbError> {
        Ok(self.get_workflow(workflow_id).await?.team_id)
    }
}
