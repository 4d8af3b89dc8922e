//! Request handlers, shared state, and error mapping.

pub mod executions;
pub mod workflows;

use std::sync::Arc;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use db::{DbError, WorkflowRow, WorkflowStore};
use engine::{AccessError, EngineError, GraphValidationError, WorkflowExecutor};

/// Header carrying the caller's team. Authentication happens upstream.
pub const TEAM_HEADER: &str = "x-team-id";

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<dyn WorkflowStore>,
    pub executor: Arc<WorkflowExecutor>,
}

impl AppState {
    pub fn new(workflows: Arc<dyn WorkflowStore>, executor: Arc<WorkflowExecutor>) -> Self {
        Self { workflows, executor }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid x-team-id header")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("resource belongs to another team")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Invalid(#[from] GraphValidationError),

    #[error("internal error")]
    Internal(String),
}

/// One violation as served to the editor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<ViolationBody>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(detail) => {
                error!("request failed: {detail}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let violations = match &self {
            Self::Invalid(err) => err
                .violations
                .iter()
                .map(|v| ViolationBody {
                    message: v.to_string(),
                    node_id: v.node_id().map(str::to_owned),
                })
                .collect(),
            _ => Vec::new(),
        };
        let error = match &self {
            Self::Invalid(_) => "workflow graph is invalid".to_owned(),
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error, violations })).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotFound => Self::NotFound,
            AccessError::Forbidden => Self::Forbidden,
            AccessError::Database(e) => e.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(e) => Self::Invalid(e),
            EngineError::Definition(e) => Self::Internal(format!("stored definition is unreadable: {e}")),
            EngineError::Database(e) => e.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Caller's team from the [`TEAM_HEADER`] header.
pub fn team_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get(TEAM_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(ApiError::Unauthorized)
}

/// Load a workflow, enforcing team ownership.
pub async fn owned_workflow(state: &AppState, id: Uuid, team_id: Uuid) -> Result<WorkflowRow, ApiError> {
    let row = state.workflows.get_workflow(id).await?;
    if row.team_id != team_id {
        return Err(ApiError::Forbidden);
    }
    Ok(row)
}
