//! warmgrid-cluster — the orchestration API boundary.
//!
//! Everything that talks to the cluster lives behind the [`WorkloadClient`]
//! trait: create a workload unit from the template, delete a unit, patch its
//! labels, list managed units by selector. The trait carries no business
//! logic; assignment policy belongs to `warmgrid-pool`.
//!
//! Two implementations:
//! - [`KubeWorkloadClient`] — Kubernetes Jobs via the `kube` client.
//! - [`FakeCluster`] — deterministic in-memory backend for tests, with
//!   failure injection and call recording.

pub mod client;
pub mod error;
pub mod fake;
pub mod kube_client;

pub use client::{CreateUnit, WorkloadClient};
pub use error::{ClusterError, ClusterResult};
pub use fake::FakeCluster;
pub use kube_client::KubeWorkloadClient;
