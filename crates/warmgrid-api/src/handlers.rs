//! Session API handlers.
//!
//! Each handler calls the pool manager and maps `PoolError` onto an HTTP
//! status: orchestrator outages are `503`, capacity is `429` (user-visible,
//! distinct from pool-empty, which the manager absorbs via on-demand
//! creation), assignment timeouts are `504`.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::{error, info};
use uuid::Uuid;

use warmgrid_cluster::{ClusterError, WorkloadClient};
use warmgrid_pool::PoolError;

use crate::ApiState;

/// How long the health probe waits for the registry lock before declaring
/// the process wedged.
const LOCK_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Successful session assignment.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    /// Where the client connects to reach its worker.
    pub endpoint: String,
    /// False when the unit was created on demand (cold start).
    pub from_pool: bool,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

fn error_response(status: StatusCode, error: &str, message: String) -> impl IntoResponse {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            message,
        }),
    )
}

/// POST /session
pub async fn create_session<C: WorkloadClient + 'static>(
    State(state): State<ApiState<C>>,
) -> impl IntoResponse {
    let session_id = generate_session_id();
    info!(session = %session_id, "session requested");

    match state.manager.assign_session(&session_id).await {
        Ok(assignment) => {
            let body = SessionResponse {
                endpoint: state.manager.config().session_endpoint(&session_id),
                session_id,
                from_pool: assignment.from_pool,
            };
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(PoolError::Cluster(ClusterError::OrchestratorUnavailable(msg))) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "orchestrator_unavailable",
            msg,
        )
        .into_response(),
        Err(PoolError::Cluster(ClusterError::QuotaExceeded(msg))) => {
            error_response(StatusCode::TOO_MANY_REQUESTS, "quota_exceeded", msg).into_response()
        }
        Err(e @ PoolError::AssignmentTimeout(_)) => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            "assignment_timeout",
            e.to_string(),
        )
        .into_response(),
        Err(e) => {
            error!(session = %session_id, error = %e, "session assignment failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                e.to_string(),
            )
            .into_response()
        }
    }
}

/// DELETE /session/{session_id}
pub async fn release_session<C: WorkloadClient + 'static>(
    State(state): State<ApiState<C>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.release_session(&session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(PoolError::Cluster(ClusterError::OrchestratorUnavailable(msg))) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "orchestrator_unavailable",
            msg,
        )
        .into_response(),
        Err(e) => {
            error!(session = %session_id, error = %e, "session release failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                e.to_string(),
            )
            .into_response()
        }
    }
}

/// GET /health
///
/// Liveness only: the process is healthy when the registry lock is still
/// acquirable and the orchestrator answers. Pool fullness is never reported
/// here — an under-filled pool degrades latency, not liveness.
pub async fn health<C: WorkloadClient + 'static>(
    State(state): State<ApiState<C>>,
) -> impl IntoResponse {
    if !state.manager.registry_responsive(LOCK_PROBE_TIMEOUT).await {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "registry_stuck",
            "pool registry lock not acquirable".to_string(),
        )
        .into_response();
    }
    if !state.manager.orchestrator_reachable().await {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "orchestrator_unavailable",
            "orchestrator ping failed".to_string(),
        )
        .into_response();
    }
    (StatusCode::OK, "OK").into_response()
}

/// Short session identifier: the first 8 hex chars of a v4 uuid, unique
/// enough for a process-scoped session space.
fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
