//! Testing utilities for the Remedy workspace
//!
//! An in-memory cluster, scripted remediation roles, and fixtures.

#![allow(missing_docs)]

pub mod agents;
pub mod cluster;

pub use agents::{
    playbook_reply, probe_reply, Hook, MockDeployer, MockRestarter, RecordingProbe,
    ScriptedBackend, ScriptedRunner, ScriptedVerifier, PLAYBOOK,
};
pub use cluster::{default_resources, EnvHealth, MockCluster};

use remedy_core::{
    EnvironmentHandle, FailureCategory, FailureSpec, HealthPolicy, TargetSelector,
};

/// Namespace every fixture lives in
pub const NAMESPACE: &str = "default";

/// Workload most fixtures target
pub const WORKLOAD: &str = "ts-order-service";

/// Experiment against [`WORKLOAD`]
#[must_use]
pub fn spec(category: FailureCategory) -> FailureSpec {
    spec_for(category, WORKLOAD)
}

/// Experiment against `workload`
#[must_use]
pub fn spec_for(category: FailureCategory, workload: &str) -> FailureSpec {
    FailureSpec::new(
        format!("exp-{category}-{workload}"),
        category,
        TargetSelector::new(NAMESPACE, workload),
    )
}

/// Environment handle without a reference manifest
#[must_use]
pub fn env() -> EnvironmentHandle {
    EnvironmentHandle::new("train-ticket", NAMESPACE)
}

/// Cluster with [`WORKLOAD`] and a second service, two replicas each
#[must_use]
pub fn cluster() -> MockCluster {
    MockCluster::new()
        .with_deployment(WORKLOAD, 2)
        .with_deployment("ts-user-service", 2)
}

/// Readiness policy that polls without waiting
#[must_use]
pub fn fast_health_policy() -> HealthPolicy {
    HealthPolicy {
        interval_secs: 0,
        metrics_interval_secs: 0,
        max_attempts: 60,
        unavailable_tolerance: 1,
    }
}
