//! Cluster readiness probe
//!
//! Classifies an environment as ready, not ready (with a reason), waiting on
//! metrics, or unprobeable, and polls that classification under a bounded
//! retry policy.

use crate::cluster::ClusterApi;
use crate::error::HealthWaitError;
use remedy_core::{EnvironmentHandle, HealthPolicy, TargetSelector};
use std::fmt;
use std::sync::Arc;

/// Why an environment is not ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReadyReason {
    /// No pod exists yet, or a pod is still pending
    NotScheduled,
    /// Pods run but some replicas are not ready
    ReplicasNotReady { ready: usize, total: usize },
}

/// Result of one readiness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Every pod serves and metrics flow
    Ready,
    /// Workload not ready
    NotReady(NotReadyReason),
    /// Pods serve but the metrics pipeline has no data yet
    MetricsUnavailable,
    /// The probe itself failed
    ProbeUnavailable(String),
}

impl HealthStatus {
    /// Whether the environment is ready
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::NotReady(NotReadyReason::NotScheduled) => f.write_str("not scheduled"),
            Self::NotReady(NotReadyReason::ReplicasNotReady { ready, total }) => {
                write!(f, "{ready}/{total} replicas ready")
            }
            Self::MetricsUnavailable => f.write_str("metrics unavailable"),
            Self::ProbeUnavailable(reason) => write!(f, "probe unavailable: {reason}"),
        }
    }
}

/// What to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeScope {
    pub namespace: String,
    pub selector: Option<String>,
    pub require_metrics: bool,
}

impl ProbeScope {
    /// Whole environment, per its liveness criteria
    #[must_use]
    pub fn environment(env: &EnvironmentHandle) -> Self {
        Self {
            namespace: env.namespace.clone(),
            selector: env.liveness.selector.clone(),
            require_metrics: env.liveness.require_metrics,
        }
    }

    /// Pods of a single workload
    #[must_use]
    pub fn target(target: &TargetSelector) -> Self {
        Self {
            namespace: target.namespace.clone(),
            selector: Some(target.label_selector()),
            require_metrics: true,
        }
    }
}

/// Readiness prober
#[derive(Clone)]
pub struct ClusterProbe {
    cluster: Arc<dyn ClusterApi>,
}

impl ClusterProbe {
    /// Create a prober over a cluster
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Classify the environment once
    pub async fn is_healthy(&self, env: &EnvironmentHandle) -> HealthStatus {
        self.probe(&ProbeScope::environment(env)).await
    }

    /// Classify a scope once
    pub async fn probe(&self, scope: &ProbeScope) -> HealthStatus {
        let selector = scope.selector.as_deref();
        let pods = match self.cluster.list_pods(&scope.namespace, selector).await {
            Ok(pods) => pods,
            Err(e) => return HealthStatus::ProbeUnavailable(e.to_string()),
        };

        if pods.is_empty()
            || pods
                .iter()
                .any(|p| p.phase == crate::cluster::PodPhase::Pending)
        {
            return HealthStatus::NotReady(NotReadyReason::NotScheduled);
        }

        let ready = pods.iter().filter(|p| p.is_serving()).count();
        if ready < pods.len() {
            return HealthStatus::NotReady(NotReadyReason::ReplicasNotReady {
                ready,
                total: pods.len(),
            });
        }

        if scope.require_metrics {
            match self
                .cluster
                .container_metrics(&scope.namespace, selector)
                .await
            {
                Ok(sample) if sample.has_data() => {}
                Ok(_) => return HealthStatus::MetricsUnavailable,
                Err(e) => return HealthStatus::ProbeUnavailable(e.to_string()),
            }
        }
        HealthStatus::Ready
    }

    /// Poll until ready or the policy's attempt ceiling is reached
    ///
    /// Returns the number of polls it took. A failed query means the cluster
    /// is gone, not merely slow; the policy's tolerance decides how many in a
    /// row that takes.
    pub async fn wait_until_ready(
        &self,
        scope: &ProbeScope,
        policy: &HealthPolicy,
    ) -> Result<u32, HealthWaitError> {
        let mut consecutive_unavailable = 0u32;
        let mut last = HealthStatus::NotReady(NotReadyReason::NotScheduled);

        for attempt in 1..=policy.max_attempts {
            let status = self.probe(scope).await;
            let delay = match &status {
                HealthStatus::Ready => {
                    tracing::info!(namespace = %scope.namespace, attempt, "environment ready");
                    return Ok(attempt);
                }
                HealthStatus::ProbeUnavailable(reason) => {
                    consecutive_unavailable += 1;
                    if consecutive_unavailable >= policy.unavailable_tolerance.max(1) {
                        return Err(HealthWaitError::Unavailable(reason.clone()));
                    }
                    policy.interval()
                }
                HealthStatus::MetricsUnavailable => {
                    consecutive_unavailable = 0;
                    policy.metrics_interval()
                }
                HealthStatus::NotReady(_) => {
                    consecutive_unavailable = 0;
                    policy.interval()
                }
            };
            tracing::debug!(
                namespace = %scope.namespace,
                attempt,
                max_attempts = policy.max_attempts,
                status = %status,
                "environment not ready yet"
            );
            last = status;
            if attempt < policy.max_attempts {
                tokio::time::sleep(delay).await;
            }
        }

        tracing::warn!(namespace = %scope.namespace, last = %last, "readiness wait exhausted");
        Err(HealthWaitError::NotReady {
            attempts: policy.max_attempts,
            last: last.to_string(),
        })
    }
}

impl fmt::Debug for ClusterProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterProbe").finish_non_exhaustive()
    }
}
