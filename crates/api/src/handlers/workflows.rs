use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use db::WorkflowRow;
use engine::{generate, Workflow, WorkflowGraph};

use super::{owned_workflow, team_id, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowDto {
    pub name: String,
    pub definition: Value,
}

#[derive(Debug, Serialize)]
pub struct CodeResponse {
    pub code: String,
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateWorkflowDto>,
) -> Result<(StatusCode, Json<WorkflowRow>), ApiError> {
    let team = team_id(&headers)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("workflow name must not be empty".into()));
    }
    serde_json::from_value::<WorkflowGraph>(payload.definition.clone())
        .map_err(|e| ApiError::BadRequest(format!("invalid workflow definition: {e}")))?;

    let row = state
        .workflows
        .create_workflow(team, payload.name.trim(), payload.definition)
        .await?;
    info!(workflow_id = %row.id, "workflow created");
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<WorkflowRow>>, ApiError> {
    let team = team_id(&headers)?;
    Ok(Json(state.workflows.list_workflows(team).await?))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WorkflowRow>, ApiError> {
    let team = team_id(&headers)?;
    Ok(Json(owned_workflow(&state, id, team).await?))
}

pub async fn delete(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let team = team_id(&headers)?;
    owned_workflow(&state, id, team).await?;
    state.workflows.delete_workflow(id).await?;
    info!(workflow_id = %id, "workflow deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Compile the stored graph and render it as a Rust source file.
pub async fn code(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CodeResponse>, ApiError> {
    let team = team_id(&headers)?;
    let workflow = load_workflow(&state, id, team).await?;
    let program = state.executor.compile(&workflow.graph)?;
    Ok(Json(CodeResponse {
        code: generate(&program, &workflow.name),
    }))
}

pub(crate) async fn load_workflow(state: &AppState, id: Uuid, team: Uuid) -> Result<Workflow, ApiError> {
    let row = owned_workflow(state, id, team).await?;
    Workflow::try_from(row)
        .map_err(|e| ApiError::Internal(format!("stored definition is unreadable: {e}")))
}
