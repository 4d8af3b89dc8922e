//! Store traits consumed by the engine and the API, and their Postgres
//! implementation on top of the repository functions.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    DbError, DbPool,
    models::{ExecutionLogRow, ExecutionRow, LogCompletion, LogTarget, NewExecutionLog, RunStatus, WorkflowRow},
    repository::{executions as exec_repo, workflows as wf_repo},
};

/// Workflow definitions, scoped by owning team.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn create_workflow(
        &self,
        team_id: Uuid,
        name: &str,
        definition: Value,
    ) -> Result<WorkflowRow, DbError>;

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;

    async fn list_workflows(&self, team_id: Uuid) -> Result<Vec<WorkflowRow>, DbError>;

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError>;
}

/// Executions and their per-node logs.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(&self, workflow_id: Uuid) -> Result<ExecutionRow, DbError>;

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError>;

    /// Returns `false` when the execution was already terminal.
    async fn update_execution_status(
        &self,
        id: Uuid,
        status: RunStatus,
        finished: bool,
    ) -> Result<bool, DbError>;

    async fn insert_log(&self, log: NewExecutionLog) -> Result<ExecutionLogRow, DbError>;

    async fn complete_log(&self, target: LogTarget, completion: LogCompletion) -> Result<(), DbError>;

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError>;

    /// Team owning the given workflow.
    async fn workflow_team(&self, workflow_id: Uuid) -> Result<Uuid, DbError>;
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn create_workflow(
        &self,
        team_id: Uuid,
        name: &str,
        definition: Value,
    ) -> Result<WorkflowRow, DbError> {
        wf_repo::create_workflow(&self.pool, team_id, name, definition).await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        wf_repo::get_workflow(&self.pool, id).await
    }

    async fn list_workflows(&self, team_id: Uuid) -> Result<Vec<WorkflowRow>, DbError> {
        wf_repo::list_workflows(&self.pool, team_id).await
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        wf_repo::delete_workflow(&self.pool, id).await
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn create_execution(&self, workflow_id: Uuid) -> Result<ExecutionRow, DbError> {
        exec_repo::create_execution(&self.pool, workflow_id).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError> {
        exec_repo::get_execution(&self.pool, id).await
    }

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: RunStatus,
        finished: bool,
    ) -> Result<bool, DbError> {
        exec_repo::update_execution_status(&self.pool, id, status, finished).await
    }

    async fn insert_log(&self, log: NewExecutionLog) -> Result<ExecutionLogRow, DbError> {
        exec_repo::insert_log(&self.pool, &log).await
    }

    async fn complete_log(&self, target: LogTarget, completion: LogCompletion) -> Result<(), DbError> {
        exec_repo::complete_log(&self.pool, &target, &completion).await
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
        exec_repo::list_logs(&self.pool, execution_id).await
    }

    async fn workflow_team(&self, workflow_id: Uuid) -> Result<Uuid, DbError> {
        Ok(wf_repo::get_workflow(&self.pool, workflow_id).await?.team_id)
    }
}
