//! Replenisher — background loop restoring the pool to target size.
//!
//! Runs on its own task, decoupled from request handling: session-creation
//! latency stays bounded by pool availability alone, and the window where
//! the pool sits under target right after an assignment burst is absorbed
//! by the on-demand fallback.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use warmgrid_cluster::WorkloadClient;

use crate::manager::PoolManager;

/// Timer-driven pool top-up task.
pub struct Replenisher<C> {
    manager: Arc<PoolManager<C>>,
    interval: Duration,
}

impl<C: WorkloadClient + 'static> Replenisher<C> {
    pub fn new(manager: Arc<PoolManager<C>>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run until the shutdown channel fires.
    ///
    /// Each tick is best effort; `replenish` logs individual creation
    /// failures and the next tick retries. Nothing here is ever escalated
    /// to a process-fatal condition.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "replenisher started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let created = self.manager.replenish().await;
                    if created > 0 {
                        debug!(created, "replenisher tick restored warm units");
                    }
                }
                _ = shutdown.changed() => {
                    info!("replenisher shutting down");
                    break;
                }
            }
        }
    }
}
