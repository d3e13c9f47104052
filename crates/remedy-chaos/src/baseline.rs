//! Baseline snapshot and restore
//!
//! Before a fault is injected the target's declared configuration is
//! captured. After the trial the workload is brought back to it: abnormal or
//! drifted pods are deleted, the reference manifest is re-applied (or the
//! captured resources patched back when no manifest covers the workload),
//! and the workload is awaited until ready.

use crate::cluster::{ClusterApi, ContainerResources, WorkloadResources};
use crate::error::BaselineError;
use crate::probe::{ClusterProbe, ProbeScope};
use crate::quantity::{ResourceList, ResourceRequirements};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use remedy_core::{EnvironmentHandle, HealthPolicy, TargetSelector, WorkloadRef};
use serde::Deserialize as _;
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One restorable document of the reference manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDoc {
    pub workload: WorkloadRef,
    pub containers: Vec<ContainerResources>,
    pub yaml: String,
}

/// Reference manifest indexed by `app` label
#[derive(Debug, Clone, Default)]
pub struct ManifestIndex {
    docs: IndexMap<String, ManifestDoc>,
}

fn quantity(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn resource_list(section: Option<&Value>) -> ResourceList {
    ResourceList {
        cpu: quantity(section.and_then(|s| s.get("cpu"))),
        memory: quantity(section.and_then(|s| s.get("memory"))),
    }
}

fn containers_of(pod_spec: Option<&Value>) -> Vec<ContainerResources> {
    pod_spec
        .and_then(|s| s.get("containers"))
        .and_then(Value::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter_map(|c| {
                    let name = c.get("name")?.as_str()?.to_string();
                    let resources = c.get("resources");
                    Some(ContainerResources {
                        name,
                        resources: ResourceRequirements::new(
                            resource_list(resources.and_then(|r| r.get("requests"))),
                            resource_list(resources.and_then(|r| r.get("limits"))),
                        ),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

impl ManifestIndex {
    /// Index a multi-document manifest
    pub fn parse(text: &str) -> Result<Self, BaselineError> {
        let mut docs = IndexMap::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let doc = Value::deserialize(document)
                .map_err(|e| BaselineError::Manifest(e.to_string()))?;
            let Some(kind) = doc.get("kind").and_then(Value::as_str) else {
                continue;
            };
            let name = doc
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();

            let (app, pod_spec) = match kind {
                "Deployment" | "StatefulSet" | "DaemonSet" => {
                    let template = doc.get("spec").and_then(|s| s.get("template"));
                    (
                        template
                            .and_then(|t| t.get("metadata"))
                            .and_then(|m| m.get("labels"))
                            .and_then(|l| l.get("app"))
                            .and_then(Value::as_str),
                        template.and_then(|t| t.get("spec")),
                    )
                }
                "Pod" => (
                    doc.get("metadata")
                        .and_then(|m| m.get("labels"))
                        .and_then(|l| l.get("app"))
                        .and_then(Value::as_str),
                    doc.get("spec"),
                ),
                _ => continue,
            };
            let Some(app) = app else {
                tracing::debug!(kind, name = %name, "manifest document has no app label");
                continue;
            };

            let yaml =
                serde_yaml::to_string(&doc).map_err(|e| BaselineError::Manifest(e.to_string()))?;
            docs.insert(
                app.to_string(),
                ManifestDoc {
                    workload: WorkloadRef {
                        kind: kind.to_string(),
                        name,
                    },
                    containers: containers_of(pod_spec),
                    yaml,
                },
            );
        }
        Ok(Self { docs })
    }

    /// Index a manifest file
    pub fn load(path: &Path) -> Result<Self, BaselineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BaselineError::Manifest(format!("{}: {e}", path.display())))?;
        let index = Self::parse(&text)?;
        tracing::info!(path = %path.display(), workloads = index.len(), "reference manifest indexed");
        Ok(index)
    }

    /// Document for an `app` label
    #[must_use]
    pub fn get(&self, app: &str) -> Option<&ManifestDoc> {
        self.docs.get(app)
    }

    /// Number of restorable workloads
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether nothing is restorable
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Captured pre-injection state of a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub target: TargetSelector,
    pub workload: WorkloadResources,
    pub manifest: Option<ManifestDoc>,
    pub fingerprint: String,
    pub taken_at: DateTime<Utc>,
}

/// Fingerprint of declared resources
#[must_use]
pub fn fingerprint(workload: &WorkloadResources) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workload.workload.kind.as_bytes());
    hasher.update(b"/");
    hasher.update(workload.workload.name.as_bytes());
    let mut containers: Vec<&ContainerResources> = workload.containers.iter().collect();
    containers.sort_by(|a, b| a.name.cmp(&b.name));
    for c in containers {
        hasher.update(b"\n");
        hasher.update(c.name.as_bytes());
        hasher.update(c.resources.canonical().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// What a restore did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreAck {
    pub pods_deleted: usize,
    pub manifest_applied: bool,
    pub containers_patched: usize,
}

/// Snapshots and restores workloads
pub struct BaselineGuard {
    cluster: Arc<dyn ClusterApi>,
    probe: ClusterProbe,
    policy: HealthPolicy,
    manifest_path: Option<PathBuf>,
    index: Mutex<HashMap<PathBuf, Arc<ManifestIndex>>>,
}

impl BaselineGuard {
    /// Create a guard
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>, policy: HealthPolicy) -> Self {
        Self {
            probe: ClusterProbe::new(Arc::clone(&cluster)),
            cluster,
            policy,
            manifest_path: None,
            index: Mutex::new(HashMap::new()),
        }
    }

    /// With a fallback manifest used when the environment names none
    #[must_use]
    pub fn with_manifest_path(mut self, path: Option<PathBuf>) -> Self {
        self.manifest_path = path;
        self
    }

    /// Manifest index for an environment, loaded once per path
    fn manifest_for(&self, env: &EnvironmentHandle) -> Option<Arc<ManifestIndex>> {
        let path = env.manifest_path.as_ref().or(self.manifest_path.as_ref())?;
        let mut cache = self.index.lock();
        if let Some(index) = cache.get(path) {
            return Some(Arc::clone(index));
        }
        match ManifestIndex::load(path) {
            Ok(index) => {
                let index = Arc::new(index);
                cache.insert(path.clone(), Arc::clone(&index));
                Some(index)
            }
            Err(e) => {
                tracing::warn!(error = %e, "reference manifest unavailable, restoring from live snapshot");
                None
            }
        }
    }

    /// Capture the target's declared configuration
    pub async fn snapshot(
        &self,
        env: &EnvironmentHandle,
        target: &TargetSelector,
    ) -> Result<Snapshot, BaselineError> {
        let workload = self
            .cluster
            .workload_resources(&target.namespace, &target.workload)
            .await?;
        let manifest = self
            .manifest_for(env)
            .and_then(|index| index.get(&target.workload).cloned());
        let snapshot = Snapshot {
            target: target.clone(),
            fingerprint: fingerprint(&workload),
            workload,
            manifest,
            taken_at: Utc::now(),
        };
        tracing::debug!(target = %target, fingerprint = %snapshot.fingerprint, "baseline captured");
        Ok(snapshot)
    }

    /// Whether the target's live configuration equals the snapshot
    pub async fn matches(&self, snapshot: &Snapshot) -> Result<bool, BaselineError> {
        let live = self
            .cluster
            .workload_resources(&snapshot.target.namespace, &snapshot.target.workload)
            .await?;
        Ok(live.equivalent(&snapshot.workload))
    }

    /// Bring the target back to the snapshot and wait until it serves
    pub async fn restore(
        &self,
        snapshot: &Snapshot,
    ) -> Result<RestoreAck, BaselineError> {
        let target = &snapshot.target;
        let mut ack = RestoreAck::default();

        let pods = self
            .cluster
            .list_pods(&target.namespace, Some(&target.label_selector()))
            .await?;
        for pod in &pods {
            let drifted = snapshot.workload.containers.iter().any(|expected| {
                pod.container(&expected.name)
                    .is_some_and(|live| !live.resources.equivalent(&expected.resources))
            });
            if !pod.is_serving() || drifted {
                tracing::info!(pod = %pod.name, drifted, "deleting abnormal pod");
                match self.cluster.delete_pod(&target.namespace, &pod.name).await {
                    Ok(()) => ack.pods_deleted += 1,
                    Err(e) if e.is_unreachable() => return Err(e.into()),
                    Err(e) => tracing::warn!(pod = %pod.name, error = %e, "pod deletion failed"),
                }
            }
        }

        if let Some(doc) = &snapshot.manifest {
            self.cluster
                .apply_manifest(&target.namespace, &doc.yaml)
                .await?;
            ack.manifest_applied = true;
        } else if !self.matches(snapshot).await? {
            for container in &snapshot.workload.containers {
                self.cluster
                    .patch_container_resources(
                        &target.namespace,
                        &snapshot.workload.workload,
                        &container.name,
                        &container.resources,
                    )
                    .await?;
                ack.containers_patched += 1;
            }
        }

        self.probe
            .wait_until_ready(&ProbeScope::target(target), &self.policy)
            .await?;
        tracing::info!(target = %target, ?ack, "baseline restored");
        Ok(ack)
    }
}

impl fmt::Debug for BaselineGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaselineGuard")
            .field("policy", &self.policy)
            .field("manifest_path", &self.manifest_path)
            .finish_non_exhaustive()
    }
}
