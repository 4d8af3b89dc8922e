//! `api` crate — HTTP REST API layer.
//!
//! Exposes:
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows
//!   GET    /api/v1/workflows/{id}
//!   DELETE /api/v1/workflows/{id}
//!   GET    /api/v1/workflows/{id}/code
//!   POST   /api/v1/workflows/{id}/execute
//!   POST   /api/v1/executions/{id}/stop
//!   GET    /api/v1/executions/{id}/logs
//!   GET    /api/v1/executions/{id}/status
//!
//! Every route is scoped to the team named in the `x-team-id` header.

pub mod handlers;

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use handlers::{ApiError, AppState, TEAM_HEADER};

use handlers::{executions, workflows};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows", post(workflows::create).get(workflows::list))
        .route(
            "/api/v1/workflows/{id}",
            get(workflows::get).delete(workflows::delete),
        )
        .route("/api/v1/workflows/{id}/code", get(workflows::code))
        .route("/api/v1/workflows/{id}/execute", post(executions::execute))
        .route("/api/v1/executions/{id}/stop", post(executions::stop))
        .route("/api/v1/executions/{id}/logs", get(executions::logs))
        .route("/api/v1/executions/{id}/status", get(executions::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}
