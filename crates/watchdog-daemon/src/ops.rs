//! Ops HTTP API.
//!
//! Thin axum layer over [`SchedulerService`]. Every handler reads or
//! mutates scheduler state directly; there is no state of its own.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::info;

use watchdog_scheduler::{SchedulerError, SchedulerService, SkipReason, TriggerOutcome};

/// Build the ops router.
pub fn router(scheduler: SchedulerService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/watchdog/status", get(status))
        .route("/watchdog/jobs/{name}/trigger", post(trigger))
        .route("/watchdog/jobs/{name}/pause", post(pause))
        .route("/watchdog/jobs/{name}/resume", post(resume))
        .route("/watchdog/circuit-breakers/{name}/reset", post(reset_breaker))
        .with_state(scheduler)
}

/// Serve the ops API until `shutdown` resolves.
pub async fn run_ops_server_with_shutdown<F>(
    addr: SocketAddr,
    scheduler: SchedulerService,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Ops API listening");
    axum::serve(listener, router(scheduler))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(scheduler): State<SchedulerService>) -> impl IntoResponse {
    Json(scheduler.health())
}

/// Ready while the scheduler accepts work. Degraded breakers do not fail readiness.
async fn ready(State(scheduler): State<SchedulerService>) -> Response {
    if scheduler.is_shutting_down() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "reason": "shutting_down" })),
        )
            .into_response();
    }
    Json(json!({ "ready": true, "is_running": scheduler.is_running() })).into_response()
}

async fn status(State(scheduler): State<SchedulerService>) -> impl IntoResponse {
    Json(scheduler.watchdog_status())
}

async fn trigger(
    State(scheduler): State<SchedulerService>,
    Path(name): Path<String>,
) -> Response {
    match scheduler.trigger_job(&name).await {
        Ok(outcome) => (outcome_status(&outcome), Json(outcome)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn pause(State(scheduler): State<SchedulerService>, Path(name): Path<String>) -> Response {
    match scheduler.pause_job(&name) {
        Ok(()) => Json(json!({ "job": name, "paused": true })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn resume(State(scheduler): State<SchedulerService>, Path(name): Path<String>) -> Response {
    match scheduler.resume_job(&name) {
        Ok(()) => Json(json!({ "job": name, "paused": false })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn reset_breaker(
    State(scheduler): State<SchedulerService>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    Json(scheduler.reset_circuit_breaker(&name))
}

fn outcome_status(outcome: &TriggerOutcome) -> StatusCode {
    match outcome {
        TriggerOutcome::Completed(run) if run.success => StatusCode::OK,
        TriggerOutcome::Completed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        TriggerOutcome::Skipped { reason, .. } => match reason {
            SkipReason::AlreadyRunning => StatusCode::CONFLICT,
            SkipReason::Paused => StatusCode::LOCKED,
            SkipReason::Shutdown | SkipReason::CircuitBreaker { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        },
    }
}

fn error_response(err: SchedulerError) -> Response {
    let status = match err {
        SchedulerError::JobNotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
