//! warmgrid-pool — the pool manager and replenisher.
//!
//! The [`PoolManager`] owns the registry exclusively and serializes every
//! state transition: assignment from the warm pool (FIFO), on-demand
//! fallback when the pool is empty, release on termination, and
//! reconciliation against the cluster's labeled ground truth.
//!
//! The [`Replenisher`] is an independent timer task that tops the pool back
//! up to its target size; it shares nothing with request handling except the
//! manager's serialized interface.

pub mod error;
pub mod manager;
pub mod replenisher;

pub use error::{PoolError, PoolResult};
pub use manager::{Assignment, PoolManager};
pub use replenisher::Replenisher;
