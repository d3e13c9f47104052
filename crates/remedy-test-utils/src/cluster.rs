//! In-memory cluster
//!
//! Workloads carry declared resources and a replica count. Chaos objects
//! applied through [`ClusterApi::apply_manifest`] produce the matching
//! symptom on their target until they are deleted or the target is healed.

use async_trait::async_trait;
use parking_lot::Mutex;
use remedy_chaos::{
    ClusterApi, ClusterError, ContainerInfo, ContainerResources, ContainerUsage, ExecOutput,
    ManifestIndex, MetricsSample, PodInfo, PodPhase, ResourceList, ResourceRequirements,
    WorkloadResources,
};
use remedy_core::WorkloadRef;
use serde_yaml::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

/// Idle CPU usage of every container
pub const BASE_CPU_MILLICORES: u64 = 50;
/// Idle memory usage of every container
pub const BASE_MEMORY_BYTES: u64 = 128 * 1024 * 1024;

/// Whole-environment state returned by one unselected pod listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvHealth {
    Ready,
    /// No pods exist
    NotScheduled,
    /// One pod is not ready
    PartiallyReady,
    /// Pods serve but the metrics pipeline is empty
    MetricsUnavailable,
    /// The API server does not answer
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Cpu,
    Memory,
    PodFailure,
    Network,
    Disk,
}

#[derive(Debug, Clone)]
struct ChaosObject {
    app: String,
    effect: Effect,
}

#[derive(Debug, Clone)]
struct MockWorkload {
    workload: WorkloadRef,
    containers: Vec<ContainerResources>,
    replicas: usize,
}

#[derive(Debug, Default)]
struct State {
    workloads: HashMap<String, MockWorkload>,
    original: HashMap<String, Vec<ContainerResources>>,
    chaos: HashMap<(String, String), ChaosObject>,
    healed: HashSet<String>,
    stalled_kinds: HashSet<String>,
    env_script: VecDeque<EnvHealth>,
    env_now: Option<EnvHealth>,
    fault_takes_hold: bool,
    unreachable: bool,
    calls: Vec<String>,
}

/// Default declared resources of a mock container
#[must_use]
pub fn default_resources() -> ResourceRequirements {
    ResourceRequirements::new(
        ResourceList::new("100m", "256Mi"),
        ResourceList::new("500m", "1Gi"),
    )
}

/// In-memory [`ClusterApi`]
#[derive(Debug)]
pub struct MockCluster {
    state: Mutex<State>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    /// Empty cluster in which faults take hold
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                fault_takes_hold: true,
                ..State::default()
            }),
        }
    }

    /// Add a deployment with one container named after it
    #[must_use]
    pub fn with_deployment(self, app: &str, replicas: usize) -> Self {
        self.with_workload(
            WorkloadRef::deployment(app),
            app,
            vec![ContainerResources {
                name: app.to_string(),
                resources: default_resources(),
            }],
            replicas,
        )
    }

    /// Add a workload
    #[must_use]
    pub fn with_workload(
        self,
        workload: WorkloadRef,
        app: &str,
        containers: Vec<ContainerResources>,
        replicas: usize,
    ) -> Self {
        {
            let mut state = self.state.lock();
            state.original.insert(app.to_string(), containers.clone());
            state.workloads.insert(
                app.to_string(),
                MockWorkload {
                    workload,
                    containers,
                    replicas,
                },
            );
        }
        self
    }

    /// Queue whole-environment states for successive unselected listings
    pub fn script_env<I: IntoIterator<Item = EnvHealth>>(&self, steps: I) {
        self.state.lock().env_script.extend(steps);
    }

    /// Whether applied chaos produces symptoms
    pub fn set_fault_takes_hold(&self, takes_hold: bool) {
        self.state.lock().fault_takes_hold = takes_hold;
    }

    /// Make every call fail as unreachable
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Make deletions of a kind hang until finalizers are cleared
    pub fn stall_deletes(&self, kind: &str) {
        self.state.lock().stalled_kinds.insert(kind.to_string());
    }

    /// Suppress symptoms on a workload and undo resource drift
    pub fn heal(&self, app: &str) {
        let mut state = self.state.lock();
        state.healed.insert(app.to_string());
        if let Some(original) = state.original.get(app).cloned() {
            if let Some(w) = state.workloads.get_mut(app) {
                w.containers = original;
            }
        }
    }

    /// Declared resources of a workload
    #[must_use]
    pub fn resources_of(&self, app: &str) -> Option<Vec<ContainerResources>> {
        self.state.lock().workloads.get(app).map(|w| w.containers.clone())
    }

    /// Number of live chaos objects
    #[must_use]
    pub fn chaos_count(&self) -> usize {
        self.state.lock().chaos.len()
    }

    /// Names of live chaos objects as `Kind/name`
    #[must_use]
    pub fn chaos_objects(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .chaos
            .keys()
            .map(|(kind, name)| format!("{kind}/{name}"))
            .collect();
        names.sort();
        names
    }

    /// Every call made so far
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Calls whose log line starts with `prefix`
    #[must_use]
    pub fn calls_starting_with(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn enter(&self, call: String) -> Result<(), ClusterError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.unreachable {
            return Err(ClusterError::Unreachable("connection refused".into()));
        }
        Ok(())
    }
}

fn app_of(selector: Option<&str>) -> Option<&str> {
    selector.and_then(|s| s.strip_prefix("app="))
}

impl State {
    fn effects_on(&self, app: &str) -> Vec<Effect> {
        if !self.fault_takes_hold || self.healed.contains(app) {
            return Vec::new();
        }
        self.chaos
            .values()
            .filter(|c| c.app == app)
            .map(|c| c.effect)
            .collect()
    }

    fn pods_of(&self, app: &str) -> Vec<PodInfo> {
        let Some(w) = self.workloads.get(app) else {
            return Vec::new();
        };
        let failing = self.effects_on(app).contains(&Effect::PodFailure);
        (0..w.replicas)
            .map(|i| PodInfo {
                name: format!("{app}-{i}"),
                phase: PodPhase::Running,
                ready: !failing,
                terminating: false,
                containers: w
                    .containers
                    .iter()
                    .map(|c| ContainerInfo {
                        name: c.name.clone(),
                        ready: !failing,
                        resources: c.resources.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    fn usage_of(&self, app: &str) -> Vec<ContainerUsage> {
        let effects = self.effects_on(app);
        self.pods_of(app)
            .into_iter()
            .flat_map(|PodInfo { name: pod, containers, .. }| {
                let effects = effects.clone();
                containers
                    .into_iter()
                    .map(move |c| {
                        let cpu = if effects.contains(&Effect::Cpu) {
                            c.resources.limits.cpu_millicores().unwrap_or(1000)
                        } else {
                            BASE_CPU_MILLICORES
                        };
                        let memory = if effects.contains(&Effect::Memory) {
                            c.resources.limits.memory_bytes().unwrap_or(1 << 30)
                        } else {
                            BASE_MEMORY_BYTES
                        };
                        ContainerUsage {
                            pod: pod.clone(),
                            container: c.name,
                            cpu_millicores: cpu,
                            memory_bytes: memory,
                        }
                    })
            })
            .collect()
    }

    fn sorted_apps(&self) -> Vec<String> {
        let mut apps: Vec<String> = self.workloads.keys().cloned().collect();
        apps.sort();
        apps
    }
}

fn chaos_effect(kind: &str, doc: &Value) -> Option<Effect> {
    match kind {
        "StressChaos" => {
            let stressors = doc.get("spec").and_then(|s| s.get("stressors"));
            if stressors.and_then(|s| s.get("memory")).is_some() {
                Some(Effect::Memory)
            } else {
                Some(Effect::Cpu)
            }
        }
        "PodChaos" => Some(Effect::PodFailure),
        "NetworkChaos" => Some(Effect::Network),
        "IOChaos" => Some(Effect::Disk),
        _ => None,
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_pods(
        &self,
        _namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        self.enter(format!("list-pods {}", selector.unwrap_or("*")))?;
        let mut state = self.state.lock();
        if let Some(app) = app_of(selector) {
            return Ok(state.pods_of(app));
        }

        let step = state.env_script.pop_front().unwrap_or(EnvHealth::Ready);
        state.env_now = Some(step);
        let mut pods: Vec<PodInfo> = state
            .sorted_apps()
            .iter()
            .flat_map(|app| state.pods_of(app))
            .collect();
        match step {
            EnvHealth::Unreachable => Err(ClusterError::Unreachable("connection refused".into())),
            EnvHealth::NotScheduled => Ok(Vec::new()),
            EnvHealth::PartiallyReady => {
                if let Some(first) = pods.first_mut() {
                    first.ready = false;
                }
                Ok(pods)
            }
            EnvHealth::Ready | EnvHealth::MetricsUnavailable => Ok(pods),
        }
    }

    async fn container_metrics(
        &self,
        _namespace: &str,
        selector: Option<&str>,
    ) -> Result<MetricsSample, ClusterError> {
        self.enter(format!("metrics {}", selector.unwrap_or("*")))?;
        let state = self.state.lock();
        let rows = match app_of(selector) {
            Some(app) => state.usage_of(app),
            None => {
                if state.env_now == Some(EnvHealth::MetricsUnavailable) {
                    return Ok(MetricsSample::Unavailable("metrics not available yet".into()));
                }
                state
                    .sorted_apps()
                    .iter()
                    .flat_map(|app| state.usage_of(app))
                    .collect()
            }
        };
        if rows.is_empty() {
            Ok(MetricsSample::Unavailable("No resources found".into()))
        } else {
            Ok(MetricsSample::Available(rows))
        }
    }

    async fn exec(
        &self,
        _namespace: &str,
        pod: &str,
        _container: Option<&str>,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError> {
        self.enter(format!("exec {pod} {}", command.join(" ")))?;
        let state = self.state.lock();
        let app = pod.rsplit_once('-').map_or(pod, |(app, _)| app);
        let effects = state.effects_on(app);

        let joined = command.join(" ");
        let stdout = if command.first().is_some_and(|c| c == "ping") {
            if effects.contains(&Effect::Network) {
                "3 packets transmitted, 0 received, 100% packet loss, time 2040ms\n".to_string()
            } else {
                "3 packets transmitted, 3 received, 0% packet loss, time 2003ms\n\
                 rtt min/avg/max/mdev = 0.9/1.2/1.6/0.3 ms\n"
                    .to_string()
            }
        } else if joined.contains("dd if=/dev/zero") {
            let ms = if effects.contains(&Effect::Disk) { 5000 } else { 40 };
            format!("10+0 records in\n10+0 records out\n{ms}\n")
        } else {
            String::new()
        };
        Ok(ExecOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn apply_manifest(&self, _namespace: &str, manifest: &str) -> Result<(), ClusterError> {
        let doc: Value =
            serde_yaml::from_str(manifest).map_err(|e| ClusterError::Parse(e.to_string()))?;
        let kind = doc.get("kind").and_then(Value::as_str).unwrap_or_default();
        let name = doc
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        self.enter(format!("apply {kind}/{name}"))?;

        if let Some(effect) = chaos_effect(kind, &doc) {
            let app = doc
                .get("spec")
                .and_then(|s| s.get("selector"))
                .and_then(|s| s.get("labelSelectors"))
                .and_then(|l| l.get("app"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let mut state = self.state.lock();
            state.healed.remove(&app);
            state
                .chaos
                .insert((kind.to_string(), name.to_string()), ChaosObject { app, effect });
            return Ok(());
        }

        let index = ManifestIndex::parse(manifest).map_err(|e| ClusterError::Parse(e.to_string()))?;
        let mut state = self.state.lock();
        for app in state.sorted_apps() {
            if let Some(doc) = index.get(&app) {
                if let Some(w) = state.workloads.get_mut(&app) {
                    w.containers = doc.containers.clone();
                }
            }
        }
        Ok(())
    }

    async fn delete_resource(
        &self,
        _namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.enter(format!("delete {kind}/{name}"))?;
        let stalled = self.state.lock().stalled_kinds.contains(kind);
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.state
            .lock()
            .chaos
            .remove(&(kind.to_string(), name.to_string()));
        Ok(())
    }

    async fn clear_finalizers(
        &self,
        _namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.enter(format!("clear-finalizers {kind}/{name}"))?;
        self.state
            .lock()
            .chaos
            .remove(&(kind.to_string(), name.to_string()));
        Ok(())
    }

    async fn delete_pod(&self, _namespace: &str, pod: &str) -> Result<(), ClusterError> {
        self.enter(format!("delete-pod {pod}"))
    }

    async fn workload_resources(
        &self,
        namespace: &str,
        app: &str,
    ) -> Result<WorkloadResources, ClusterError> {
        self.enter(format!("workload {app}"))?;
        self.state
            .lock()
            .workloads
            .get(app)
            .map(|w| WorkloadResources {
                workload: w.workload.clone(),
                containers: w.containers.clone(),
            })
            .ok_or_else(|| ClusterError::NotFound(format!("{namespace}/{app}")))
    }

    async fn patch_container_resources(
        &self,
        namespace: &str,
        workload: &WorkloadRef,
        container: &str,
        resources: &ResourceRequirements,
    ) -> Result<(), ClusterError> {
        self.enter(format!("patch {}/{} {container}", workload.kind, workload.name))?;
        let mut state = self.state.lock();
        let target = state
            .workloads
            .values_mut()
            .find(|w| &w.workload == workload)
            .and_then(|w| w.containers.iter_mut().find(|c| c.name == container))
            .ok_or_else(|| ClusterError::NotFound(format!("{namespace}/{}", workload.name)))?;
        target.resources = resources.clone();
        Ok(())
    }
}
