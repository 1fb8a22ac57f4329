//! Workload client error taxonomy.

use thiserror::Error;

/// Result type alias for workload client operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by the orchestration API boundary.
///
/// Transport failures are never retried inside the client — a retry policy
/// belongs to the caller's next request, not to the boundary, so an outage
/// is not amplified.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The orchestrator could not be reached (transport/connectivity).
    #[error("orchestrator unavailable: {0}")]
    OrchestratorUnavailable(String),

    /// Cluster resource limits were hit while creating a unit.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The target unit no longer exists. Idempotent callers treat this as
    /// already-achieved state, not as a failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other rejection from the orchestration API.
    #[error("orchestrator rejected request: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClusterError::OrchestratorUnavailable(_))
    }
}
