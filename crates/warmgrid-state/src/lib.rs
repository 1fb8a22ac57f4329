//! warmgrid-state — in-memory pool state for WarmGrid.
//!
//! Holds the unit model, the label contract shared with the cluster, the
//! process-wide pool configuration, and the `PoolRegistry` — the in-memory
//! registry of known units and their assignment state.
//!
//! # Architecture
//!
//! The registry is a plain synchronous structure. It performs no I/O and
//! takes no locks of its own; the pool manager owns exactly one instance
//! behind a `tokio::sync::RwLock` and serializes every mutation through it.
//! The registry is a cache of cluster-side truth: everything in it can be
//! re-derived from the orchestrator's label-selector listing (`apply_observed`).

pub mod config;
pub mod labels;
pub mod registry;
pub mod types;

pub use config::{ConfigError, PoolConfig};
pub use registry::{PoolRegistry, ReconcileReport};
pub use types::*;
