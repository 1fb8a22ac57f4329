//! The in-memory pool registry.
//!
//! `PoolRegistry` tracks every unit the provisioner believes exists and its
//! assignment state. It is deliberately synchronous and lock-free: the pool
//! manager wraps the single instance in a `tokio::sync::RwLock` and performs
//! each select-and-transition as one call under the write guard, so two
//! concurrent assignments can never pick the same warm unit.
//!
//! The registry is a cache. The cluster's labels are the ground truth, and
//! `apply_observed` re-derives local state from them at startup and on every
//! reconciliation pass.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::labels::{assigned_labels, session_from_labels, warm_labels};
use crate::types::{PoolCounts, Unit, UnitId, UnitState};

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Units present in the cluster but previously unknown locally.
    pub added: Vec<UnitId>,
    /// Local entries dropped because the cluster no longer has the unit.
    pub removed: Vec<UnitId>,
    /// Local entries whose state was rewritten from cluster labels.
    pub corrected: Vec<UnitId>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.corrected.is_empty()
    }
}

/// In-memory registry of known units.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    units: HashMap<UnitId, Unit>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit. Replaces any previous entry with the same id.
    pub fn insert(&mut self, unit: Unit) {
        self.units.insert(unit.id.clone(), unit);
    }

    pub fn get(&self, id: &str) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Unit> {
        self.units.remove(id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Select the oldest warm unit and transition it to `Assigned` with
    /// `session_id` stamped, in one step.
    ///
    /// FIFO order (oldest `created_at` first, id as tie-break) bounds the age
    /// of pooled resources. Returns the updated unit, or `None` when the pool
    /// is empty and the caller must fall back to on-demand creation.
    pub fn take_oldest_warm(&mut self, session_id: &str) -> Option<Unit> {
        let id = self
            .units
            .values()
            .filter(|u| u.is_warm())
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|u| u.id.clone())?;

        let unit = self.units.get_mut(&id)?;
        unit.state = UnitState::Assigned;
        unit.session_id = Some(session_id.to_string());
        unit.labels = assigned_labels(session_id);
        Some(unit.clone())
    }

    /// Compensation rollback: return an assigned unit to the warm pool.
    ///
    /// Used when the cluster-side relabel failed after the in-memory
    /// transition, or when an on-demand unit's requester went away. Only an
    /// `Assigned` unit can be reverted; anything else is left untouched.
    pub fn revert_to_warm(&mut self, id: &str) -> bool {
        match self.units.get_mut(id) {
            Some(unit) if unit.state == UnitState::Assigned => {
                unit.state = UnitState::Warm;
                unit.session_id = None;
                unit.labels = warm_labels();
                true
            }
            _ => false,
        }
    }

    /// Transition the unit serving `session_id` to `Terminating`.
    ///
    /// Returns the unit id on the `Assigned → Terminating` edge, and `None`
    /// for unknown sessions or units already terminating — release is
    /// idempotent and a retried termination signal must not trigger a second
    /// delete.
    pub fn mark_terminating(&mut self, session_id: &str) -> Option<UnitId> {
        let unit = self
            .units
            .values_mut()
            .find(|u| u.session_id.as_deref() == Some(session_id))?;
        if unit.state != UnitState::Assigned {
            return None;
        }
        unit.state = UnitState::Terminating;
        Some(unit.id.clone())
    }

    pub fn find_by_session(&self, session_id: &str) -> Option<&Unit> {
        self.units
            .values()
            .find(|u| u.session_id.as_deref() == Some(session_id))
    }

    pub fn warm_count(&self) -> usize {
        self.units.values().filter(|u| u.is_warm()).count()
    }

    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts::default();
        for unit in self.units.values() {
            match unit.state {
                UnitState::Warm => counts.warm += 1,
                UnitState::Assigned => counts.assigned += 1,
                UnitState::Terminating => counts.terminating += 1,
                UnitState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Owned snapshot of all units, for metrics and tests.
    pub fn snapshot(&self) -> Vec<Unit> {
        self.units.values().cloned().collect()
    }

    /// Reconcile the registry against an observed cluster listing.
    ///
    /// The listing is ground truth: units it contains are adopted (classified
    /// warm or assigned by their labels), local entries it lacks are dropped.
    /// One exception: a locally `Assigned` unit whose cluster labels still
    /// say warm is NOT downgraded — its relabel may be in flight, and the
    /// cluster is behind the registry rather than ahead of it. The skew is
    /// logged and left for the relabel's own compensation path.
    pub fn apply_observed(&mut self, observed: Vec<Unit>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let observed_ids: HashSet<UnitId> = observed.iter().map(|u| u.id.clone()).collect();

        let stale: Vec<UnitId> = self
            .units
            .keys()
            .filter(|id| !observed_ids.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.units.remove(&id);
            debug!(unit = %id, "dropped unit no longer present in cluster");
            report.removed.push(id);
        }

        for mut unit in observed {
            let cluster_session = session_from_labels(&unit.labels).map(str::to_string);
            match self.units.get_mut(&unit.id) {
                None => {
                    if unit.state != UnitState::Failed {
                        match cluster_session {
                            Some(session) => {
                                unit.state = UnitState::Assigned;
                                unit.session_id = Some(session);
                            }
                            None => {
                                unit.state = UnitState::Warm;
                                unit.session_id = None;
                            }
                        }
                    }
                    debug!(unit = %unit.id, state = ?unit.state, "adopted unit from cluster");
                    report.added.push(unit.id.clone());
                    self.units.insert(unit.id.clone(), unit);
                }
                // The orchestrator reports the unit as failed: it is dead
                // regardless of what the registry thought it was doing.
                Some(known) if unit.state == UnitState::Failed => {
                    if known.state != UnitState::Failed {
                        warn!(unit = %known.id, was = ?known.state, "unit failed in cluster");
                        known.state = UnitState::Failed;
                        known.session_id = None;
                        report.corrected.push(known.id.clone());
                    }
                }
                Some(known) => match (known.state, cluster_session) {
                    (UnitState::Warm, Some(session)) => {
                        warn!(
                            unit = %known.id,
                            session = %session,
                            "registry said warm but cluster says assigned; trusting cluster"
                        );
                        known.state = UnitState::Assigned;
                        known.session_id = Some(session);
                        known.labels = unit.labels;
                        report.corrected.push(known.id.clone());
                    }
                    (UnitState::Assigned, Some(session))
                        if known.session_id.as_deref() != Some(session.as_str()) =>
                    {
                        warn!(
                            unit = %known.id,
                            local = ?known.session_id,
                            cluster = %session,
                            "session id skew; trusting cluster"
                        );
                        known.session_id = Some(session);
                        known.labels = unit.labels;
                        report.corrected.push(known.id.clone());
                    }
                    (UnitState::Assigned, None) => {
                        // Relabel may still be in flight; leave the registry alone.
                        debug!(unit = %known.id, "cluster labels lag in-memory assignment");
                    }
                    _ => {}
                },
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{assigned_labels, warm_labels};

    fn warm_unit(id: &str, created_at: u64) -> Unit {
        Unit {
            id: id.to_string(),
            state: UnitState::Warm,
            session_id: None,
            created_at,
            labels: warm_labels(),
        }
    }

    #[test]
    fn take_oldest_warm_is_fifo() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("u2", 200));
        registry.insert(warm_unit("u1", 100));
        registry.insert(warm_unit("u3", 300));

        let unit = registry.take_oldest_warm("s1").unwrap();
        assert_eq!(unit.id, "u1");
        assert_eq!(unit.state, UnitState::Assigned);
        assert_eq!(unit.session_id.as_deref(), Some("s1"));

        let unit = registry.take_oldest_warm("s2").unwrap();
        assert_eq!(unit.id, "u2");
    }

    #[test]
    fn take_oldest_warm_ties_break_by_id() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("b", 100));
        registry.insert(warm_unit("a", 100));

        assert_eq!(registry.take_oldest_warm("s1").unwrap().id, "a");
    }

    #[test]
    fn take_oldest_warm_empty_pool() {
        let mut registry = PoolRegistry::new();
        assert!(registry.take_oldest_warm("s1").is_none());

        // An assigned unit is not selectable.
        registry.insert(warm_unit("u1", 100));
        registry.take_oldest_warm("s1").unwrap();
        assert!(registry.take_oldest_warm("s2").is_none());
    }

    #[test]
    fn assigned_unit_updates_labels() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("u1", 100));
        let unit = registry.take_oldest_warm("s1").unwrap();
        assert_eq!(unit.labels, assigned_labels("s1"));
    }

    #[test]
    fn revert_to_warm_rolls_back_assignment() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("u1", 100));
        registry.take_oldest_warm("s1").unwrap();

        assert!(registry.revert_to_warm("u1"));
        let unit = registry.get("u1").unwrap();
        assert_eq!(unit.state, UnitState::Warm);
        assert_eq!(unit.session_id, None);
        assert_eq!(unit.labels, warm_labels());
        assert_eq!(registry.warm_count(), 1);
    }

    #[test]
    fn revert_to_warm_only_from_assigned() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("u1", 100));
        assert!(!registry.revert_to_warm("u1"));
        assert!(!registry.revert_to_warm("missing"));

        registry.take_oldest_warm("s1").unwrap();
        registry.mark_terminating("s1").unwrap();
        assert!(!registry.revert_to_warm("u1"));
    }

    #[test]
    fn mark_terminating_is_idempotent() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("u1", 100));
        registry.take_oldest_warm("s1").unwrap();

        assert_eq!(registry.mark_terminating("s1").as_deref(), Some("u1"));
        // Second signal: already terminating, no second delete.
        assert_eq!(registry.mark_terminating("s1"), None);
        // Unknown session: no-op.
        assert_eq!(registry.mark_terminating("nope"), None);
    }

    #[test]
    fn counts_by_state() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("u1", 100));
        registry.insert(warm_unit("u2", 200));
        registry.insert(warm_unit("u3", 300));
        registry.take_oldest_warm("s1").unwrap();

        let counts = registry.counts();
        assert_eq!(counts.warm, 2);
        assert_eq!(counts.assigned, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn reconcile_adopts_unknown_warm_unit() {
        let mut registry = PoolRegistry::new();
        let report = registry.apply_observed(vec![warm_unit("u1", 100)]);

        assert_eq!(report.added, vec!["u1".to_string()]);
        assert_eq!(registry.get("u1").unwrap().state, UnitState::Warm);
        assert_eq!(registry.warm_count(), 1);
    }

    #[test]
    fn reconcile_adopts_unknown_assigned_unit() {
        let mut registry = PoolRegistry::new();
        let mut observed = warm_unit("u1", 100);
        observed.labels = assigned_labels("s9");

        registry.apply_observed(vec![observed]);
        let unit = registry.get("u1").unwrap();
        assert_eq!(unit.state, UnitState::Assigned);
        assert_eq!(unit.session_id.as_deref(), Some("s9"));
    }

    #[test]
    fn reconcile_drops_stale_entries() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("gone", 100));
        registry.insert(warm_unit("kept", 200));

        let report = registry.apply_observed(vec![warm_unit("kept", 200)]);
        assert_eq!(report.removed, vec!["gone".to_string()]);
        assert!(registry.get("gone").is_none());
        assert!(registry.get("kept").is_some());
    }

    #[test]
    fn reconcile_corrects_warm_to_assigned() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("u1", 100));

        let mut observed = warm_unit("u1", 100);
        observed.labels = assigned_labels("s5");
        let report = registry.apply_observed(vec![observed]);

        assert_eq!(report.corrected, vec!["u1".to_string()]);
        let unit = registry.get("u1").unwrap();
        assert_eq!(unit.state, UnitState::Assigned);
        assert_eq!(unit.session_id.as_deref(), Some("s5"));
    }

    #[test]
    fn reconcile_keeps_in_flight_assignment() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("u1", 100));
        registry.take_oldest_warm("s1").unwrap();

        // Cluster listing still shows warm labels (relabel in flight).
        let report = registry.apply_observed(vec![warm_unit("u1", 100)]);
        assert!(report.is_clean());
        let unit = registry.get("u1").unwrap();
        assert_eq!(unit.state, UnitState::Assigned);
        assert_eq!(unit.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn reconcile_marks_failed_units() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("u1", 100));

        let mut observed = warm_unit("u1", 100);
        observed.state = UnitState::Failed;
        let report = registry.apply_observed(vec![observed]);

        assert_eq!(report.corrected, vec!["u1".to_string()]);
        assert_eq!(registry.get("u1").unwrap().state, UnitState::Failed);
        assert_eq!(registry.warm_count(), 0);
        // A failed unit is never selectable.
        assert!(registry.take_oldest_warm("s1").is_none());
    }

    #[test]
    fn reconcile_empty_listing_clears_registry() {
        let mut registry = PoolRegistry::new();
        registry.insert(warm_unit("u1", 100));
        registry.insert(warm_unit("u2", 200));

        let report = registry.apply_observed(Vec::new());
        assert_eq!(report.removed.len(), 2);
        assert!(registry.is_empty());
    }
}
