//! `kubectl`-backed cluster access

use crate::cluster::{
    ClusterApi, ContainerInfo, ContainerResources, ContainerUsage, ExecOutput, MetricsSample,
    PodInfo, PodPhase, WorkloadResources,
};
use crate::error::ClusterError;
use crate::quantity::{parse_cpu_millicores, parse_memory_bytes, ResourceRequirements};
use async_trait::async_trait;
use remedy_core::WorkloadRef;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

const UNREACHABLE_MARKERS: &[&str] = &[
    "Unable to connect to the server",
    "connection refused",
    "i/o timeout",
    "no route to host",
];

const METRICS_UNAVAILABLE_MARKERS: &[&str] = &["metrics not available", "No resources found"];

/// Cluster access through the `kubectl` binary
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: String,
    kubeconfig: Option<PathBuf>,
    command_timeout: Duration,
}

impl Kubectl {
    /// Create a client using `binary`
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            kubeconfig: None,
            command_timeout: Duration::from_secs(30),
        }
    }

    /// With explicit credentials
    #[must_use]
    pub fn with_kubeconfig(mut self, path: Option<PathBuf>) -> Self {
        self.kubeconfig = path;
        self
    }

    /// With per-command timeout
    #[must_use]
    pub fn with_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    async fn run(&self, args: &[String], stdin: Option<&str>) -> Result<ExecOutput, ClusterError> {
        let mut cmd = Command::new(&self.binary);
        if let Some(path) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(path);
        }
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let rendered = format!("{} {}", self.binary, args.join(" "));
        tracing::debug!(command = %rendered, "running cluster command");

        let mut child = cmd
            .spawn()
            .map_err(|e| ClusterError::Unreachable(format!("cannot launch {}: {e}", self.binary)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| ClusterError::CommandFailed {
                    command: rendered.clone(),
                    stderr: format!("cannot write stdin: {e}"),
                })?;
        }

        let output = timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| ClusterError::Timeout(self.command_timeout.as_secs()))?
            .map_err(|e| ClusterError::CommandFailed {
                command: rendered.clone(),
                stderr: e.to_string(),
            })?;

        let out = ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if UNREACHABLE_MARKERS.iter().any(|m| out.stderr.contains(m)) {
            return Err(ClusterError::Unreachable(out.stderr.trim().to_string()));
        }
        Ok(out)
    }

    async fn run_checked(
        &self,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<String, ClusterError> {
        let out = self.run(args, stdin).await?;
        if out.success() {
            Ok(out.stdout)
        } else if out.stderr.contains("NotFound") || out.stderr.contains("not found") {
            Err(ClusterError::NotFound(out.stderr.trim().to_string()))
        } else {
            Err(ClusterError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                stderr: out.stderr.trim().to_string(),
            })
        }
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

fn with_selector(mut base: Vec<String>, selector: Option<&str>) -> Vec<String> {
    if let Some(selector) = selector {
        base.push("-l".to_string());
        base.push(selector.to_string());
    }
    base
}

#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    deletion_timestamp: Option<String>,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ContainerSpec {
    name: String,
    #[serde(default)]
    resources: ResourceRequirements,
}

#[derive(Debug, Default, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<ContainerSpec>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    name: String,
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

impl From<Pod> for PodInfo {
    fn from(pod: Pod) -> Self {
        let ready = pod
            .status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True");
        let containers = pod
            .spec
            .containers
            .into_iter()
            .map(|c| ContainerInfo {
                ready: pod
                    .status
                    .container_statuses
                    .iter()
                    .any(|s| s.name == c.name && s.ready),
                name: c.name,
                resources: c.resources,
            })
            .collect();
        Self {
            name: pod.metadata.name,
            phase: PodPhase::parse(&pod.status.phase),
            ready,
            terminating: pod.metadata.deletion_timestamp.is_some(),
            containers,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PodTemplate {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct WorkloadSpec {
    #[serde(default)]
    template: PodTemplate,
}

#[derive(Debug, Deserialize)]
struct Workload {
    kind: String,
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: WorkloadSpec,
}

/// Parse `kubectl top pod --containers --no-headers` output
pub(crate) fn parse_top_output(stdout: &str) -> Vec<ContainerUsage> {
    stdout
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            Some(ContainerUsage {
                pod: cols[0].to_string(),
                container: cols[1].to_string(),
                cpu_millicores: parse_cpu_millicores(cols[2])?,
                memory_bytes: parse_memory_bytes(cols[3])?,
            })
        })
        .collect()
}

#[async_trait]
impl ClusterApi for Kubectl {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        let stdout = self
            .run_checked(
                &with_selector(args(["get", "pods", "-n", namespace, "-o", "json"]), selector),
                None,
            )
            .await?;
        let list: ObjectList<Pod> =
            serde_json::from_str(&stdout).map_err(|e| ClusterError::Parse(e.to_string()))?;
        Ok(list.items.into_iter().map(PodInfo::from).collect())
    }

    async fn container_metrics(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<MetricsSample, ClusterError> {
        let out = self
            .run(
                &with_selector(
                    args(["top", "pod", "-n", namespace, "--containers", "--no-headers"]),
                    selector,
                ),
                None,
            )
            .await?;
        let combined = out.combined();
        if let Some(marker) = METRICS_UNAVAILABLE_MARKERS
            .iter()
            .find(|m| combined.contains(**m))
        {
            return Ok(MetricsSample::Unavailable((*marker).to_string()));
        }
        if !out.success() {
            return Ok(MetricsSample::Unavailable(out.stderr.trim().to_string()));
        }
        Ok(MetricsSample::Available(parse_top_output(&out.stdout)))
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError> {
        let mut argv = args(["exec", pod, "-n", namespace]);
        if let Some(container) = container {
            argv.push("-c".to_string());
            argv.push(container.to_string());
        }
        argv.push("--".to_string());
        argv.extend(command.iter().cloned());
        self.run(&argv, None).await
    }

    async fn apply_manifest(&self, namespace: &str, manifest: &str) -> Result<(), ClusterError> {
        self.run_checked(&args(["apply", "-n", namespace, "-f", "-"]), Some(manifest))
            .await
            .map(drop)
    }

    async fn delete_resource(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let kind = kind.to_ascii_lowercase();
        self.run_checked(
            &args(["delete", kind.as_str(), name, "-n", namespace, "--ignore-not-found"]),
            None,
        )
        .await
        .map(drop)
    }

    async fn clear_finalizers(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let kind = kind.to_ascii_lowercase();
        self.run_checked(
            &args([
                "patch",
                kind.as_str(),
                name,
                "-n",
                namespace,
                "--type=merge",
                "-p",
                r#"{"metadata":{"finalizers":[]}}"#,
            ]),
            None,
        )
        .await
        .map(drop)
    }

    async fn delete_pod(&self, namespace: &str, pod: &str) -> Result<(), ClusterError> {
        self.run_checked(
            &args(["delete", "pod", pod, "-n", namespace, "--wait=false"]),
            None,
        )
        .await
        .map(drop)
    }

    async fn workload_resources(
        &self,
        namespace: &str,
        app: &str,
    ) -> Result<WorkloadResources, ClusterError> {
        let stdout = self
            .run_checked(
                &args(["get", "deployments,statefulsets", "-n", namespace, "-o", "json"]),
                None,
            )
            .await?;
        let list: ObjectList<Workload> =
            serde_json::from_str(&stdout).map_err(|e| ClusterError::Parse(e.to_string()))?;
        list.items
            .into_iter()
            .find(|w| w.spec.template.metadata.labels.get("app").map(String::as_str) == Some(app))
            .map(|w| WorkloadResources {
                workload: WorkloadRef {
                    kind: w.kind,
                    name: w.metadata.name,
                },
                containers: w
                    .spec
                    .template
                    .spec
                    .containers
                    .into_iter()
                    .map(|c| ContainerResources {
                        name: c.name,
                        resources: c.resources,
                    })
                    .collect(),
            })
            .ok_or_else(|| ClusterError::NotFound(format!("workload with app={app}")))
    }

    async fn patch_container_resources(
        &self,
        namespace: &str,
        workload: &WorkloadRef,
        container: &str,
        resources: &ResourceRequirements,
    ) -> Result<(), ClusterError> {
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{
                            "name": container,
                            "resources": resources,
                        }]
                    }
                }
            }
        });
        let kind = workload.kind.to_ascii_lowercase();
        let body = patch.to_string();
        self.run_checked(
            &args([
                "patch",
                kind.as_str(),
                workload.name.as_str(),
                "-n",
                namespace,
                "--type=strategic",
                "-p",
                body.as_str(),
            ]),
            None,
        )
        .await
        .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_top_rows() {
        let rows = parse_top_output(
            "ts-order-service-7d9f  ts-order-service  250m  300Mi\n\
             ts-order-service-7d9f  sidecar-busybox   1m    2Mi\n\
             garbage\n",
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cpu_millicores, 250);
        assert_eq!(rows[0].memory_bytes, 300 * 1024 * 1024);
        assert_eq!(rows[1].container, "sidecar-busybox");
    }

    #[test]
    fn converts_pod_json() {
        let json = r#"{
          "items": [{
            "metadata": {"name": "ts-auth-1", "deletionTimestamp": "2024-01-01T00:00:00Z"},
            "spec": {"containers": [{
              "name": "ts-auth-service",
              "resources": {"limits": {"cpu": "1", "memory": "1Gi"}, "requests": {"cpu": "100m"}}
            }]},
            "status": {
              "phase": "Running",
              "conditions": [{"type": "Ready", "status": "True"}],
              "containerStatuses": [{"name": "ts-auth-service", "ready": true}]
            }
          }]
        }"#;
        let list: ObjectList<Pod> = serde_json::from_str(json).unwrap();
        let pods: Vec<PodInfo> = list.items.into_iter().map(PodInfo::from).collect();
        assert_eq!(pods.len(), 1);
        let pod = &pods[0];
        assert!(pod.ready);
        assert!(pod.terminating);
        assert!(!pod.is_serving());
        let container = pod.container("ts-auth-service").unwrap();
        assert!(container.ready);
        assert_eq!(container.resources.limits.cpu_millicores(), Some(1000));
        assert_eq!(container.resources.requests.memory, None);
    }

    #[test]
    fn selector_is_appended() {
        let argv = with_selector(args(["get", "pods"]), Some("app=x"));
        assert_eq!(argv, vec!["get", "pods", "-l", "app=x"]);
    }
}
