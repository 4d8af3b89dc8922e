//! Execution and execution-log repository functions.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{ExecutionLogRow, ExecutionRow, LogCompletion, LogTarget, NewExecutionLog, RunStatus},
};

const EXECUTION_COLUMNS: &str = "id, workflow_id, status, started_at, finished_at";

const LOG_COLUMNS: &str = "id, execution_id, node_id, node_name, node_type, status, \
                           input, output, error, started_at, finished_at";

// ---------------------------------------------------------------------------
// executions
// ---------------------------------------------------------------------------

/// Create a new execution record in `pending` status.
pub async fn create_execution(
    pool: &PgPool,
    workflow_id: Uuid,
) -> Result<ExecutionRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        r#"
        INSERT INTO executions (id, workflow_id, status, started_at)
        VALUES ($1, $2, 'pending', $3)
        RETURNING {EXECUTION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(workflow_id)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single execution by its primary key.
pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<ExecutionRow, DbError> {
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Update the `status` (and optionally `finished_at`) of an execution.
///
/// Terminal rows are left untouched; returns `false` when nothing changed.
pub async fn update_execution_status(
    pool: &PgPool,
    execution_id: Uuid,
    status: RunStatus,
    finished: bool,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE executions
        SET status = $1,
            finished_at = CASE WHEN $2 THEN $3 ELSE finished_at END
        WHERE id = $4 AND status NOT IN ('success', 'error')
        "#,
    )
    .bind(status.as_str())
    .bind(finished)
    .bind(Utc::now())
    .bind(execution_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// execution_logs
// ---------------------------------------------------------------------------

/// Insert a `running` log row for a node attempt that just started.
pub async fn insert_log(pool: &PgPool, log: &NewExecutionLog) -> Result<ExecutionLogRow, DbError> {
    let id = Uuid::new_v4();

    let row = sqlx::query_as::<_, ExecutionLogRow>(&format!(
        r#"
        INSERT INTO execution_logs
            (id, execution_id, node_id, node_name, node_type, status, input, started_at)
        VALUES ($1, $2, $3, $4, $5, 'running', $6, $7)
        RETURNING {LOG_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(log.execution_id)
    .bind(&log.node_id)
    .bind(&log.node_name)
    .bind(&log.node_type)
    .bind(&log.input)
    .bind(log.started_at)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Record the outcome of a node attempt.
///
/// Returns `DbError::NotFound` if the target row does not exist.
pub async fn complete_log(
    pool: &PgPool,
    target: &LogTarget,
    completion: &LogCompletion,
) -> Result<(), DbError> {
    let query = match target {
        LogTarget::Id(id) => sqlx::query(
            r#"
            UPDATE execution_logs
            SET status = $1, output = $2, error = $3, finished_at = $4
            WHERE id = $5
            "#,
        )
        .bind(completion.status.as_str())
        .bind(&completion.output)
        .bind(&completion.error)
        .bind(completion.finished_at)
        .bind(*id),

        LogTarget::Node { execution_id, node_id } => sqlx::query(
            r#"
            UPDATE execution_logs
            SET status = $1, output = $2, error = $3, finished_at = $4
            WHERE id = (
                SELECT id FROM execution_logs
                WHERE execution_id = $5 AND node_id = $6
                ORDER BY started_at DESC
                LIMIT 1
            )
            "#,
        )
        .bind(completion.status.as_str())
        .bind(&completion.output)
        .bind(&completion.error)
        .bind(completion.finished_at)
        .bind(*execution_id)
        .bind(node_id.as_str()),
    };

    let result = query.execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// All log rows of an execution in start order.
pub async fn list_logs(pool: &PgPool, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
    let rows = sqlx::query_as::<_, ExecutionLogRow>(&format!(
        "SELECT {LOG_COLUMNS} FROM execution_logs WHERE execution_id = $1 ORDER BY started_at, id"
    ))
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
