//! Pool manager — assignment, release, reconciliation.
//!
//! Locking discipline: the registry write lock protects the *decision*, not
//! the network round-trip. Select-and-mark happens under the lock; the
//! subsequent cluster call (`relabel`, `delete`, `create`) runs outside it,
//! with compensation if the call fails. This keeps unrelated cluster I/O
//! from serializing behind one slow request.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};

use warmgrid_cluster::{ClusterResult, CreateUnit, WorkloadClient};
use warmgrid_state::labels::{assigned_labels, managed_selector, warm_labels};
use warmgrid_state::{
    PoolConfig, PoolCounts, PoolRegistry, ReconcileReport, Unit, UnitId, UnitState,
};

use crate::error::{PoolError, PoolResult};

/// Result of a session assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub unit: Unit,
    /// True when the unit came from the warm pool (instant); false when it
    /// was created on demand (cold start, materially higher latency).
    pub from_pool: bool,
}

/// Owns the pool registry and serializes all mutations.
pub struct PoolManager<C> {
    client: Arc<C>,
    config: PoolConfig,
    registry: Arc<RwLock<PoolRegistry>>,
}

impl<C: WorkloadClient + 'static> PoolManager<C> {
    pub fn new(client: Arc<C>, config: PoolConfig) -> Self {
        Self {
            client,
            config,
            registry: Arc::new(RwLock::new(PoolRegistry::new())),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Assign a unit to `session_id`: oldest warm unit first, on-demand
    /// creation as the fallback.
    ///
    /// The on-demand path is bounded by `on_demand_timeout`; on expiry the
    /// caller gets [`PoolError::AssignmentTimeout`] while the creation
    /// finishes in the background and the unit is kept as extra warm
    /// capacity.
    pub async fn assign_session(&self, session_id: &str) -> PoolResult<Assignment> {
        // Selection and transition are one atomic section; two concurrent
        // calls can never take the same warm unit.
        let candidate = {
            let mut registry = self.registry.write().await;
            registry.take_oldest_warm(session_id)
        };

        if let Some(unit) = candidate {
            match self.client.relabel(&unit.id, &unit.labels).await {
                Ok(()) => {
                    debug!(unit = %unit.id, session = %session_id, "assigned from warm pool");
                    return Ok(Assignment {
                        unit,
                        from_pool: true,
                    });
                }
                Err(e) if e.is_not_found() => {
                    // The unit vanished under us; it is not coming back.
                    warn!(unit = %unit.id, "warm unit gone at assignment; dropping");
                    self.registry.write().await.remove(&unit.id);
                }
                Err(e) => {
                    warn!(
                        unit = %unit.id,
                        error = %e,
                        "relabel failed; reverting unit and falling back to on-demand"
                    );
                    self.registry.write().await.revert_to_warm(&unit.id);
                }
            }
        }

        self.assign_on_demand(session_id).await
    }

    /// On-demand fallback: create a unit directly in the assigned state.
    ///
    /// The creation runs in its own task so a caller timeout (or a dropped
    /// HTTP connection) cannot cancel the cluster request — abandoning a
    /// just-created unit costs more than keeping it warm.
    async fn assign_on_demand(&self, session_id: &str) -> PoolResult<Assignment> {
        info!(session = %session_id, "pool empty; creating unit on demand");

        let req = CreateUnit {
            template: self.config.template.clone(),
            labels: assigned_labels(session_id),
            session_env: Some(session_id.to_string()),
        };
        let client = self.client.clone();
        let registry = self.registry.clone();
        let (tx, rx) = oneshot::channel::<ClusterResult<Unit>>();

        tokio::spawn(async move {
            match client.create(&req).await {
                Ok(unit) => {
                    registry.write().await.insert(unit.clone());
                    if tx.send(Ok(unit.clone())).is_err() {
                        // The requester is gone. Keep the unit: demote it to
                        // warm so the pool absorbs it instead of leaking it.
                        registry.write().await.revert_to_warm(&unit.id);
                        if let Err(e) = client.relabel(&unit.id, &warm_labels()).await {
                            warn!(
                                unit = %unit.id,
                                error = %e,
                                "failed to relabel abandoned unit; reconciliation will settle it"
                            );
                        } else {
                            info!(unit = %unit.id, "abandoned on-demand unit folded into warm pool");
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            }
        });

        match tokio::time::timeout(self.config.on_demand_timeout, rx).await {
            Ok(Ok(Ok(unit))) => {
                debug!(unit = %unit.id, session = %session_id, "assigned on-demand unit");
                Ok(Assignment {
                    unit,
                    from_pool: false,
                })
            }
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(_)) => Err(PoolError::ChannelClosed),
            Err(_) => Err(PoolError::AssignmentTimeout(
                self.config.on_demand_timeout.as_secs(),
            )),
        }
    }

    /// Release the unit serving `session_id` and delete it.
    ///
    /// Unknown sessions are a no-op: termination signals get retried, and a
    /// retry must not fail or issue a second delete.
    pub async fn release_session(&self, session_id: &str) -> PoolResult<()> {
        let unit_id = {
            let mut registry = self.registry.write().await;
            registry.mark_terminating(session_id)
        };
        let Some(unit_id) = unit_id else {
            debug!(session = %session_id, "release for unknown or terminating session; no-op");
            return Ok(());
        };

        match self.client.delete(&unit_id).await {
            Ok(()) => {
                self.registry.write().await.remove(&unit_id);
                info!(unit = %unit_id, session = %session_id, "unit released and deleted");
                Ok(())
            }
            Err(e) => {
                // Deletion unconfirmed: the unit stays Terminating and the
                // next reconcile pass retries the delete.
                warn!(unit = %unit_id, error = %e, "delete failed; unit left terminating");
                Err(e.into())
            }
        }
    }

    /// Reconcile the registry against the cluster's labeled listing.
    ///
    /// The cluster is ground truth: unknown managed units are adopted, stale
    /// local entries dropped, disagreements rewritten from labels. Units
    /// stuck in `Terminating` get their delete retried here.
    pub async fn reconcile(&self) -> PoolResult<ReconcileReport> {
        let observed = self.client.list(&managed_selector()).await?;

        let (report, stuck) = {
            let mut registry = self.registry.write().await;
            let report = registry.apply_observed(observed);
            let stuck: Vec<UnitId> = registry
                .snapshot()
                .into_iter()
                .filter(|u| u.state == UnitState::Terminating)
                .map(|u| u.id)
                .collect();
            (report, stuck)
        };

        if !report.is_clean() {
            warn!(
                added = report.added.len(),
                removed = report.removed.len(),
                corrected = report.corrected.len(),
                "registry disagreed with cluster; corrected from ground truth"
            );
        }

        for unit_id in stuck {
            match self.client.delete(&unit_id).await {
                Ok(()) => {
                    self.registry.write().await.remove(&unit_id);
                    info!(unit = %unit_id, "terminating unit cleaned up");
                }
                Err(e) => warn!(unit = %unit_id, error = %e, "cleanup delete failed; will retry"),
            }
        }

        Ok(report)
    }

    /// Create warm units until the pool reaches its target size.
    ///
    /// Best effort: each creation is independent, a failure is logged and
    /// the rest proceed. Returns how many units were created.
    pub async fn replenish(&self) -> usize {
        let deficit = {
            let registry = self.registry.read().await;
            self.config
                .target_pool_size
                .saturating_sub(registry.warm_count() as u32)
        };
        if deficit == 0 {
            return 0;
        }

        debug!(deficit, "replenishing warm pool");
        let mut created = 0;
        for _ in 0..deficit {
            match self.create_warm_unit().await {
                Ok(unit) => {
                    debug!(unit = %unit.id, "warm unit created");
                    created += 1;
                }
                Err(e) => {
                    warn!(error = %e, "warm unit creation failed; continuing");
                }
            }
        }
        created
    }

    /// Startup fill: bring the pool to target before serving traffic.
    pub async fn warm_up(&self) -> usize {
        let created = self.replenish().await;
        info!(
            created,
            target = self.config.target_pool_size,
            "initial pool warm-up complete"
        );
        created
    }

    async fn create_warm_unit(&self) -> PoolResult<Unit> {
        let req = CreateUnit {
            template: self.config.template.clone(),
            labels: warm_labels(),
            session_env: None,
        };
        let unit = self.client.create(&req).await?;
        self.registry.write().await.insert(unit.clone());
        Ok(unit)
    }

    /// Registry counts snapshot (read lock only; tolerant of staleness).
    pub async fn counts(&self) -> PoolCounts {
        self.registry.read().await.counts()
    }

    /// Liveness probe half one: can the registry lock still be acquired?
    pub async fn registry_responsive(&self, within: Duration) -> bool {
        tokio::time::timeout(within, self.registry.read())
            .await
            .is_ok()
    }

    /// Liveness probe half two: can we reach the orchestrator?
    pub async fn orchestrator_reachable(&self) -> bool {
        self.client.ping().await.is_ok()
    }

    /// Owned snapshot of all registry units (metrics and tests).
    pub async fn units(&self) -> Vec<Unit> {
        self.registry.read().await.snapshot()
    }
}
