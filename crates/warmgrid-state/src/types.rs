//! Domain types for the WarmGrid pool.
//!
//! A `Unit` is one provisioned worker — a Kubernetes Job and its Pod in the
//! reference deployment. Units move monotonically forward through
//! `UnitState`; the only sanctioned backward edge is the compensation
//! rollback to `Warm` after a failed relabel, performed by the pool manager.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a unit, assigned by the orchestrator at creation.
pub type UnitId = String;

/// Unique identifier for a session.
pub type SessionId = String;

/// Lifecycle state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Pre-provisioned and ready for instant assignment.
    Warm,
    /// Serving a session; `session_id` is set.
    Assigned,
    /// Deletion requested; awaiting confirmation from the orchestrator.
    Terminating,
    /// The orchestrator reported the unit as failed.
    Failed,
}

/// One provisioned worker unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub state: UnitState,
    /// Set only when `state == Assigned`.
    pub session_id: Option<SessionId>,
    /// Unix timestamp (seconds) when the unit was created.
    pub created_at: u64,
    /// Mirror of the cluster-side labels on this unit.
    pub labels: HashMap<String, String>,
}

impl Unit {
    /// True if the unit is warm and selectable for assignment.
    pub fn is_warm(&self) -> bool {
        self.state == UnitState::Warm
    }
}

/// Template for creating worker units.
///
/// Resource quantities use Kubernetes quantity syntax (`50m`, `64Mi`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTemplate {
    /// Container image reference. A `:latest` tag is appended by the config
    /// loader when no tag is present.
    pub image: String,
    /// Container port the worker listens on.
    pub port: u16,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
}

impl Default for UnitTemplate {
    fn default() -> Self {
        Self {
            image: "warmgrid-worker:latest".to_string(),
            port: 8080,
            cpu_request: "50m".to_string(),
            cpu_limit: "100m".to_string(),
            memory_request: "64Mi".to_string(),
            memory_limit: "128Mi".to_string(),
        }
    }
}

/// Snapshot of registry counts, used by health and metrics reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounts {
    pub warm: usize,
    pub assigned: usize,
    pub terminating: usize,
    pub failed: usize,
}

impl PoolCounts {
    pub fn total(&self) -> usize {
        self.warm + self.assigned + self.terminating + self.failed
    }
}
