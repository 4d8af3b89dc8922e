use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use engine::{ExecutionLogs, NodeStatusSummary};

use super::{team_id, workflows::load_workflow, ApiError, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAccepted {
    pub execution_id: Uuid,
}

/// Validate, create the execution row, and drive the run in the background.
pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<ExecutionAccepted>), ApiError> {
    let team = team_id(&headers)?;
    let workflow = load_workflow(&state, id, team).await?;

    // Validation failures surface here, before any execution row exists.
    let program = state.executor.compile(&workflow.graph)?;
    let execution = state.executor.start(workflow.id).await?;
    let execution_id = execution.id;

    let executor = Arc::clone(&state.executor);
    tokio::spawn(async move {
        let report = executor.drive(execution_id, workflow.id, &program).await;
        info!(%execution_id, status = %report.status, "background execution finished");
    });

    Ok((StatusCode::ACCEPTED, Json(ExecutionAccepted { execution_id })))
}

pub async fn stop(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let team = team_id(&headers)?;
    if !state.executor.tracker().stop(id, team).await? {
        warn!(execution_id = %id, "stop requested for a finished execution");
    }
    Ok(StatusCode::ACCEPTED)
}

pub async fn logs(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ExecutionLogs>, ApiError> {
    let team = team_id(&headers)?;
    Ok(Json(state.executor.tracker().execution_logs(id, team).await?))
}

pub async fn status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<NodeStatusSummary>, ApiError> {
    let team = team_id(&headers)?;
    Ok(Json(state.executor.tracker().node_statuses(id, team).await?))
}
