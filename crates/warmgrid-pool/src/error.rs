//! Pool manager error types.

use thiserror::Error;

use warmgrid_cluster::ClusterError;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The orchestration boundary failed; carries the full taxonomy
    /// (unavailable, quota, not-found, rejection).
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// On-demand creation exceeded the configured bound. The underlying
    /// creation keeps running and the unit is folded back into the pool.
    #[error("assignment timed out after {0}s; creation continues in the background")]
    AssignmentTimeout(u64),

    /// The on-demand creation task went away without reporting a result.
    #[error("on-demand creation task dropped its result channel")]
    ChannelClosed,
}
