//! Deterministic in-memory workload client for tests.
//!
//! `FakeCluster` is part of the crate proper so every downstream crate can
//! drive the pool against it. Supports per-call failure injection,
//! artificial creation latency, and records every delete/relabel call for
//! assertions.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use warmgrid_state::labels::{session_from_labels, warm_labels, SESSION_ID_KEY};
use warmgrid_state::{Unit, UnitState};

use crate::client::{CreateUnit, WorkloadClient};
use crate::error::{ClusterError, ClusterResult};

#[derive(Default)]
struct Inner {
    units: HashMap<String, Unit>,
    next_id: u64,
    clock: u64,
    create_failures: VecDeque<ClusterError>,
    relabel_failures: VecDeque<ClusterError>,
    delete_failures: VecDeque<ClusterError>,
    deletes: Vec<String>,
    relabels: Vec<(String, HashMap<String, String>)>,
    creates: Vec<CreateUnit>,
    unreachable: bool,
    create_delay: Option<Duration>,
}

/// In-memory orchestrator double.
#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<Inner>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a warm unit, as if it pre-existed in the cluster.
    pub async fn seed_warm(&self, id: &str, created_at: u64) {
        let unit = Unit {
            id: id.to_string(),
            state: UnitState::Warm,
            session_id: None,
            created_at,
            labels: warm_labels(),
        };
        self.inner.lock().await.units.insert(unit.id.clone(), unit);
    }

    /// Seed an arbitrary unit.
    pub async fn seed_unit(&self, unit: Unit) {
        self.inner.lock().await.units.insert(unit.id.clone(), unit);
    }

    /// Queue an error for the next `create` call.
    pub async fn fail_next_create(&self, err: ClusterError) {
        self.inner.lock().await.create_failures.push_back(err);
    }

    /// Queue an error for the next `relabel` call.
    pub async fn fail_next_relabel(&self, err: ClusterError) {
        self.inner.lock().await.relabel_failures.push_back(err);
    }

    /// Queue an error for the next `delete` call.
    pub async fn fail_next_delete(&self, err: ClusterError) {
        self.inner.lock().await.delete_failures.push_back(err);
    }

    /// Make every call fail with `OrchestratorUnavailable` until cleared.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().await.unreachable = unreachable;
    }

    /// Delay every subsequent `create` by `delay` (for timeout tests).
    pub async fn set_create_delay(&self, delay: Duration) {
        self.inner.lock().await.create_delay = Some(delay);
    }

    pub async fn unit(&self, id: &str) -> Option<Unit> {
        self.inner.lock().await.units.get(id).cloned()
    }

    pub async fn units(&self) -> Vec<Unit> {
        self.inner.lock().await.units.values().cloned().collect()
    }

    /// Every id `delete` has been called with, in order.
    pub async fn delete_calls(&self) -> Vec<String> {
        self.inner.lock().await.deletes.clone()
    }

    /// Every `relabel` call, in order.
    pub async fn relabel_calls(&self) -> Vec<(String, HashMap<String, String>)> {
        self.inner.lock().await.relabels.clone()
    }

    pub async fn create_calls(&self) -> Vec<CreateUnit> {
        self.inner.lock().await.creates.clone()
    }
}

#[async_trait]
impl WorkloadClient for FakeCluster {
    async fn create(&self, req: &CreateUnit) -> ClusterResult<Unit> {
        let (unit, delay) = {
            let mut inner = self.inner.lock().await;
            if inner.unreachable {
                return Err(ClusterError::OrchestratorUnavailable("unreachable".into()));
            }
            if let Some(err) = inner.create_failures.pop_front() {
                return Err(err);
            }

            inner.next_id += 1;
            inner.clock += 1;
            let id = format!("unit-{}", inner.next_id);
            let created_at = 1_000 + inner.clock;

            let (state, session_id) = match session_from_labels(&req.labels) {
                Some(session) => (UnitState::Assigned, Some(session.to_string())),
                None => (UnitState::Warm, None),
            };
            let unit = Unit {
                id: id.clone(),
                state,
                session_id,
                created_at,
                labels: req.labels.clone(),
            };
            inner.units.insert(id, unit.clone());
            inner.creates.push(req.clone());
            (unit, inner.create_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(unit)
    }

    async fn delete(&self, id: &str) -> ClusterResult<()> {
        let mut inner = self.inner.lock().await;
        inner.deletes.push(id.to_string());
        if inner.unreachable {
            return Err(ClusterError::OrchestratorUnavailable("unreachable".into()));
        }
        if let Some(err) = inner.delete_failures.pop_front() {
            return Err(err);
        }
        // Absent is fine: delete is idempotent.
        inner.units.remove(id);
        Ok(())
    }

    async fn relabel(&self, id: &str, labels: &HashMap<String, String>) -> ClusterResult<()> {
        let mut inner = self.inner.lock().await;
        inner.relabels.push((id.to_string(), labels.clone()));
        if inner.unreachable {
            return Err(ClusterError::OrchestratorUnavailable("unreachable".into()));
        }
        if let Some(err) = inner.relabel_failures.pop_front() {
            return Err(err);
        }

        let unit = inner
            .units
            .get_mut(id)
            .ok_or_else(|| ClusterError::NotFound(id.to_string()))?;
        for (k, v) in labels {
            unit.labels.insert(k.clone(), v.clone());
        }
        if !labels.contains_key(SESSION_ID_KEY) {
            unit.labels.remove(SESSION_ID_KEY);
        }
        if unit.state != UnitState::Failed {
            match session_from_labels(&unit.labels) {
                Some(session) => {
                    unit.state = UnitState::Assigned;
                    unit.session_id = Some(session.to_string());
                }
                None => {
                    unit.state = UnitState::Warm;
                    unit.session_id = None;
                }
            }
        }
        Ok(())
    }

    async fn list(&self, selector: &str) -> ClusterResult<Vec<Unit>> {
        let inner = self.inner.lock().await;
        if inner.unreachable {
            return Err(ClusterError::OrchestratorUnavailable("unreachable".into()));
        }
        let matchers: Vec<(&str, &str)> = selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        Ok(inner
            .units
            .values()
            .filter(|u| {
                matchers
                    .iter()
                    .all(|(k, v)| u.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .cloned()
            .collect())
    }

    async fn ping(&self) -> ClusterResult<()> {
        let inner = self.inner.lock().await;
        if inner.unreachable {
            return Err(ClusterError::OrchestratorUnavailable("unreachable".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warmgrid_state::labels::{assigned_labels, managed_selector};
    use warmgrid_state::UnitTemplate;

    fn warm_request() -> CreateUnit {
        CreateUnit {
            template: UnitTemplate::default(),
            labels: warm_labels(),
            session_env: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let cluster = FakeCluster::new();
        let u1 = cluster.create(&warm_request()).await.unwrap();
        let u2 = cluster.create(&warm_request()).await.unwrap();

        assert_eq!(u1.id, "unit-1");
        assert_eq!(u2.id, "unit-2");
        assert!(u1.created_at < u2.created_at);
        assert_eq!(u1.state, UnitState::Warm);
    }

    #[tokio::test]
    async fn create_failure_injection_is_one_shot() {
        let cluster = FakeCluster::new();
        cluster
            .fail_next_create(ClusterError::QuotaExceeded("quota".into()))
            .await;

        assert!(matches!(
            cluster.create(&warm_request()).await,
            Err(ClusterError::QuotaExceeded(_))
        ));
        assert!(cluster.create(&warm_request()).await.is_ok());
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_recorded() {
        let cluster = FakeCluster::new();
        cluster.seed_warm("u1", 100).await;

        cluster.delete("u1").await.unwrap();
        cluster.delete("u1").await.unwrap();
        assert_eq!(cluster.delete_calls().await, vec!["u1", "u1"]);
        assert!(cluster.unit("u1").await.is_none());
    }

    #[tokio::test]
    async fn relabel_missing_unit_is_not_found() {
        let cluster = FakeCluster::new();
        let err = cluster
            .relabel("ghost", &assigned_labels("s1"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn relabel_reclassifies_unit() {
        let cluster = FakeCluster::new();
        cluster.seed_warm("u1", 100).await;

        cluster.relabel("u1", &assigned_labels("s1")).await.unwrap();
        let unit = cluster.unit("u1").await.unwrap();
        assert_eq!(unit.state, UnitState::Assigned);
        assert_eq!(unit.session_id.as_deref(), Some("s1"));

        cluster.relabel("u1", &warm_labels()).await.unwrap();
        let unit = cluster.unit("u1").await.unwrap();
        assert_eq!(unit.state, UnitState::Warm);
        assert!(!unit.labels.contains_key(SESSION_ID_KEY));
    }

    #[tokio::test]
    async fn list_filters_by_selector() {
        let cluster = FakeCluster::new();
        cluster.seed_warm("u1", 100).await;
        cluster
            .seed_unit(Unit {
                id: "foreign".to_string(),
                state: UnitState::Warm,
                session_id: None,
                created_at: 100,
                labels: HashMap::from([("app".to_string(), "other".to_string())]),
            })
            .await;

        let managed = cluster.list(&managed_selector()).await.unwrap();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].id, "u1");
    }

    #[tokio::test]
    async fn unreachable_fails_everything() {
        let cluster = FakeCluster::new();
        cluster.set_unreachable(true).await;

        assert!(cluster.ping().await.is_err());
        assert!(cluster.create(&warm_request()).await.is_err());
        assert!(cluster.list("a=b").await.is_err());

        cluster.set_unreachable(false).await;
        assert!(cluster.ping().await.is_ok());
    }
}
