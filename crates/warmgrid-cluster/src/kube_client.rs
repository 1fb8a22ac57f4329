//! Kubernetes implementation of the workload client.
//!
//! A unit is a Kubernetes Job; the orchestrator assigns its name via
//! `generateName` at creation. Pool state is mirrored into Job labels, which
//! the reconciliation path reads back as ground truth.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

use warmgrid_state::labels::SESSION_ID_KEY;
use warmgrid_state::{labels, Unit, UnitState};

use crate::client::{CreateUnit, WorkloadClient};
use crate::error::{ClusterError, ClusterResult};

/// Workload client over the Kubernetes API.
pub struct KubeWorkloadClient {
    client: Client,
    jobs: Api<Job>,
    namespace: String,
}

impl KubeWorkloadClient {
    /// Connect using the inferred config: in-cluster service account first,
    /// local kubeconfig as the fallback.
    pub async fn connect(namespace: &str) -> ClusterResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::OrchestratorUnavailable(e.to_string()))?;
        Ok(Self::new(client, namespace))
    }

    pub fn new(client: Client, namespace: &str) -> Self {
        let jobs = Api::namespaced(client.clone(), namespace);
        Self {
            client,
            jobs,
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn create(&self, req: &CreateUnit) -> ClusterResult<Unit> {
        let manifest = build_manifest(&self.namespace, req);
        let job: Job = serde_json::from_value(manifest)
            .map_err(|e| ClusterError::Api(format!("invalid unit manifest: {e}")))?;

        let created = self
            .jobs
            .create(&PostParams::default(), &job)
            .await
            .map_err(map_kube_error)?;

        let unit = job_to_unit(&created)?;
        debug!(unit = %unit.id, namespace = %self.namespace, "unit creation accepted");
        Ok(unit)
    }

    async fn delete(&self, id: &str) -> ClusterResult<()> {
        match self.jobs.delete(id, &DeleteParams::background()).await {
            Ok(_) => {
                debug!(unit = %id, "unit deletion accepted");
                Ok(())
            }
            // Already gone is the state we wanted.
            Err(e) if matches!(map_kube_error_ref(&e), ClusterError::NotFound(_)) => Ok(()),
            Err(e) => Err(map_kube_error(e)),
        }
    }

    async fn relabel(&self, id: &str, labels: &HashMap<String, String>) -> ClusterResult<()> {
        let patch = Patch::Merge(label_patch(labels));
        self.jobs
            .patch(id, &PatchParams::default(), &patch)
            .await
            .map_err(map_kube_error)?;
        debug!(unit = %id, "unit relabeled");
        Ok(())
    }

    async fn list(&self, selector: &str) -> ClusterResult<Vec<Unit>> {
        let params = ListParams::default().labels(selector);
        let jobs = self.jobs.list(&params).await.map_err(map_kube_error)?;
        jobs.items.iter().map(job_to_unit).collect()
    }

    async fn ping(&self) -> ClusterResult<()> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(|e| ClusterError::OrchestratorUnavailable(e.to_string()))
    }
}

/// Build the Job manifest for one unit.
///
/// Completed or failed Jobs are garbage-collected by the cluster after five
/// minutes (`ttlSecondsAfterFinished`); the unit itself never retries
/// (`backoffLimit: 0`, `restartPolicy: Never`).
fn build_manifest(namespace: &str, req: &CreateUnit) -> serde_json::Value {
    let mut env = vec![json!({
        "name": "POD_NAME",
        "valueFrom": {"fieldRef": {"fieldPath": "metadata.name"}}
    })];
    if let Some(session_id) = &req.session_env {
        env.push(json!({"name": "SESSION_ID", "value": session_id}));
    }

    let template = &req.template;
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "generateName": "warmgrid-unit-",
            "namespace": namespace,
            "labels": req.labels,
        },
        "spec": {
            "ttlSecondsAfterFinished": 300,
            "backoffLimit": 0,
            "template": {
                "metadata": {"labels": req.labels},
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "worker",
                        "image": template.image,
                        "imagePullPolicy": "IfNotPresent",
                        "ports": [{"containerPort": template.port, "name": "session"}],
                        "env": env,
                        "readinessProbe": {
                            "httpGet": {"path": "/health", "port": template.port},
                            "initialDelaySeconds": 2,
                            "periodSeconds": 3,
                        },
                        "livenessProbe": {
                            "httpGet": {"path": "/health", "port": template.port},
                            "initialDelaySeconds": 5,
                            "periodSeconds": 10,
                        },
                        "resources": {
                            "requests": {
                                "cpu": template.cpu_request,
                                "memory": template.memory_request,
                            },
                            "limits": {
                                "cpu": template.cpu_limit,
                                "memory": template.memory_limit,
                            },
                        },
                    }],
                },
            },
        },
    })
}

/// Merge-patch body for a relabel.
///
/// When the new label set drops `session-id` (demotion back to warm), the
/// key is nulled explicitly so the merge patch removes it instead of leaving
/// a stale session on the unit.
fn label_patch(labels: &HashMap<String, String>) -> serde_json::Value {
    let mut patch: serde_json::Map<String, serde_json::Value> = labels
        .iter()
        .map(|(k, v)| (k.clone(), json!(v)))
        .collect();
    if !labels.contains_key(SESSION_ID_KEY) {
        patch.insert(SESSION_ID_KEY.to_string(), serde_json::Value::Null);
    }
    json!({"metadata": {"labels": patch}})
}

/// Map a Job onto the unit model.
///
/// A Job with failed executions is a `Failed` unit; otherwise the labels
/// decide between warm and assigned, exactly as reconciliation reads them.
fn job_to_unit(job: &Job) -> ClusterResult<Unit> {
    let id = job
        .metadata
        .name
        .clone()
        .ok_or_else(|| ClusterError::Api("orchestrator returned a unit without a name".into()))?;

    let unit_labels: HashMap<String, String> = job
        .metadata
        .labels
        .clone()
        .map(|m| m.into_iter().collect())
        .unwrap_or_default();

    let created_at = job
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0.timestamp().max(0) as u64)
        .unwrap_or_default();

    let failed = job
        .status
        .as_ref()
        .and_then(|s| s.failed)
        .unwrap_or_default()
        > 0;

    let (state, session_id) = if failed {
        (UnitState::Failed, None)
    } else {
        match labels::session_from_labels(&unit_labels) {
            Some(session) => (UnitState::Assigned, Some(session.to_string())),
            None => (UnitState::Warm, None),
        }
    };

    Ok(Unit {
        id,
        state,
        session_id,
        created_at,
        labels: unit_labels,
    })
}

fn map_kube_error(err: kube::Error) -> ClusterError {
    map_kube_error_ref(&err)
}

fn map_kube_error_ref(err: &kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) => {
            if resp.code == 404 {
                ClusterError::NotFound(resp.message.clone())
            } else if resp.message.contains("exceeded quota") || resp.reason == "Forbidden" {
                ClusterError::QuotaExceeded(resp.message.clone())
            } else {
                ClusterError::Api(resp.message.clone())
            }
        }
        // Everything that is not an API verdict is transport or client-side
        // plumbing: the orchestrator could not be consulted.
        other => ClusterError::OrchestratorUnavailable(other.to_string()),
    }
}
