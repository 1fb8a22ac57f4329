//! The workload client trait.

use std::collections::HashMap;

use async_trait::async_trait;

use warmgrid_state::{Unit, UnitTemplate};

use crate::error::ClusterResult;

/// Request to create one workload unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateUnit {
    /// Container template the unit is stamped from.
    pub template: UnitTemplate,
    /// Labels applied to the unit at creation.
    pub labels: HashMap<String, String>,
    /// Session id injected into the worker's environment. Set on the
    /// on-demand path, absent for warm creations (a warm unit learns its
    /// session at assignment time, through labels).
    pub session_env: Option<String>,
}

/// Abstraction over the cluster orchestration API.
///
/// A pure I/O boundary: create a unit from a template, delete a unit, patch
/// labels, list by selector. Every successful `create` consumes live cluster
/// resources until a matching `delete` — leaking is on the caller.
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Submit a creation request. Returns once the orchestrator has
    /// *accepted* the unit (assigned it an id), not once it is running.
    async fn create(&self, req: &CreateUnit) -> ClusterResult<Unit>;

    /// Delete a unit. Idempotent: succeeds if the unit is already gone.
    async fn delete(&self, id: &str) -> ClusterResult<()>;

    /// Patch labels on a unit (partial update). Fails with `NotFound` when
    /// the unit no longer exists; callers treat that as already-gone.
    async fn relabel(&self, id: &str, labels: &HashMap<String, String>) -> ClusterResult<()>;

    /// List units matching a label selector. Reconciliation only — never on
    /// the request hot path.
    async fn list(&self, selector: &str) -> ClusterResult<Vec<Unit>>;

    /// Cheap reachability probe, used by the health endpoint.
    async fn ping(&self) -> ClusterResult<()>;
}
