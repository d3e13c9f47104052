//! Cluster access seam
//!
//! Every interaction with the container orchestrator goes through
//! [`ClusterApi`]. The production implementation shells out to `kubectl`
//! ([`crate::kubectl::Kubectl`]); tests use an in-memory cluster.

use crate::error::ClusterError;
use crate::quantity::ResourceRequirements;
use async_trait::async_trait;
use remedy_core::WorkloadRef;
use serde::{Deserialize, Serialize};

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the phase string reported by the API
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Declared container inside a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub ready: bool,
    pub resources: ResourceRequirements,
}

impl ContainerInfo {
    /// Whether this is an injected helper rather than the workload itself
    #[must_use]
    pub fn is_sidecar(&self) -> bool {
        is_sidecar_name(&self.name)
    }
}

/// Whether a container name denotes a helper container
#[must_use]
pub fn is_sidecar_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("sidecar") || lower.contains("busybox")
}

/// Observed pod state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub phase: PodPhase,
    /// `Ready` condition is true
    pub ready: bool,
    /// A deletion timestamp is set
    pub terminating: bool,
    pub containers: Vec<ContainerInfo>,
}

impl PodInfo {
    /// Running, ready and not being deleted
    #[inline]
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.phase == PodPhase::Running && self.ready && !self.terminating
    }

    /// Declared resources of a container
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&ContainerInfo> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Live usage of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub pod: String,
    pub container: String,
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
}

/// Answer of the metrics pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricsSample {
    /// Usage per container
    Available(Vec<ContainerUsage>),
    /// The pipeline has no data yet
    Unavailable(String),
}

impl MetricsSample {
    /// Usage rows, empty when unavailable
    #[must_use]
    pub fn usage(&self) -> &[ContainerUsage] {
        match self {
            Self::Available(rows) => rows,
            Self::Unavailable(_) => &[],
        }
    }

    /// Whether the pipeline returned at least one row
    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.usage().is_empty()
    }
}

/// Output of a command run inside a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited with status zero
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Declared resources of one container of a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerResources {
    pub name: String,
    pub resources: ResourceRequirements,
}

/// Declared resources of a workload controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadResources {
    pub workload: WorkloadRef,
    pub containers: Vec<ContainerResources>,
}

impl WorkloadResources {
    /// First declared container
    #[must_use]
    pub fn primary_container(&self) -> Option<&ContainerResources> {
        self.containers.first()
    }

    /// Whether every container declares the same amounts as `other`
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        self.workload == other.workload
            && self.containers.len() == other.containers.len()
            && self.containers.iter().all(|c| {
                other
                    .containers
                    .iter()
                    .any(|o| o.name == c.name && o.resources.equivalent(&c.resources))
            })
    }
}

/// Operations the harness needs from the container orchestrator
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List pods, optionally restricted by a label selector
    async fn list_pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<PodInfo>, ClusterError>;

    /// Per-container usage from the metrics pipeline
    async fn container_metrics(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<MetricsSample, ClusterError>;

    /// Run a command inside a container; a non-zero exit is not an error
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError>;

    /// Create or update objects from a YAML manifest
    async fn apply_manifest(&self, namespace: &str, manifest: &str) -> Result<(), ClusterError>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete_resource(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<(), ClusterError>;

    /// Strip finalizers so a stuck deletion can complete
    async fn clear_finalizers(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<(), ClusterError>;

    /// Delete a pod so its controller recreates it
    async fn delete_pod(&self, namespace: &str, pod: &str) -> Result<(), ClusterError>;

    /// Declared resources of the controller owning pods labelled `app=<app>`
    async fn workload_resources(
        &self,
        namespace: &str,
        app: &str,
    ) -> Result<WorkloadResources, ClusterError>;

    /// Overwrite the declared resources of one container of a workload
    async fn patch_container_resources(
        &self,
        namespace: &str,
        workload: &WorkloadRef,
        container: &str,
        resources: &ResourceRequirements,
    ) -> Result<(), ClusterError>;
}
