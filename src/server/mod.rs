//! HTTP service
//!
//! `POST /run` takes a run request and answers with the run's outcome;
//! `GET /health` reports liveness. A client that disconnects mid-run cancels
//! it: the handler future is dropped, the drop guard fires the token, and the
//! detached run task kills the engine and removes the workspace.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::common::config::Config;
use crate::common::Result;
use crate::supervisor::RunSupervisor;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub supervisor: RunSupervisor,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn run(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            tracing::debug!("Unreadable run request: {}", rejection.body_text());
            return (
                rejection.status(),
                Json(ErrorResponse {
                    error: rejection.body_text(),
                }),
            )
                .into_response();
        }
    };

    // The run lives in its own task so cleanup still happens after the
    // handler future is dropped; the guard only tells it to stop early.
    let cancel = CancellationToken::new();
    let _cancel_on_disconnect = cancel.clone().drop_guard();

    let supervisor = state.supervisor.clone();
    let task = tokio::spawn(async move { supervisor.execute(&body, cancel).await });
    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Run task failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("Internal error: {}", e),
                }),
            )
                .into_response();
        }
    };
    let status =
        StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome)).into_response()
}

/// Build the router around a supervisor
pub fn create_app(supervisor: RunSupervisor) -> Router {
    let body_limit = supervisor.config().server.max_body_mb * 1024 * 1024;
    let state = AppState { supervisor };

    Router::new()
        .route("/health", get(health))
        .route("/run", post(run))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl+C
pub async fn serve(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let app = create_app(RunSupervisor::new(config));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("QA runner listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("QA runner stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
