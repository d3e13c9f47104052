//! Remedy Chaos - the harness's hands on the cluster
//!
//! - [`ClusterApi`]: the seam every cluster interaction goes through, with a
//!   `kubectl` implementation
//! - [`ClusterProbe`]: readiness classification and bounded readiness waits
//! - [`RecoveryChecks`]: per-category symptom and recovery checks
//! - [`FaultInjector`]: applies and withdraws faults, one per workload
//! - [`BaselineGuard`]: snapshots and restores workload configuration
//! - [`EnvironmentDeployer`]: brings an environment up
//!
//! # Example
//!
//! ```rust,ignore
//! use remedy_chaos::{ClusterProbe, FaultInjector, Kubectl};
//! use std::sync::Arc;
//!
//! let cluster = Arc::new(Kubectl::new("kubectl"));
//! let probe = ClusterProbe::new(cluster.clone());
//! let injector = FaultInjector::new(cluster);
//! let record = injector.inject(&spec).await?;
//! injector.revert(&mut record).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod baseline;
pub mod checks;
pub mod cluster;
pub mod deploy;
pub mod error;
pub mod injector;
pub mod kubectl;
pub mod probe;
pub mod quantity;
pub mod templates;

pub use baseline::{BaselineGuard, ManifestDoc, ManifestIndex, RestoreAck, Snapshot};
pub use checks::{CheckThresholds, CheckVerdict, RecoveryChecks};
pub use cluster::{
    ClusterApi, ContainerInfo, ContainerResources, ContainerUsage, ExecOutput, MetricsSample,
    PodInfo, PodPhase, WorkloadResources,
};
pub use deploy::{EnvironmentDeployer, ScriptDeployer};
pub use error::{BaselineError, ClusterError, DeployError, HealthWaitError, InjectionError};
pub use injector::{misconfigured_resources, FaultInjector, RevertAck};
pub use kubectl::Kubectl;
pub use probe::{ClusterProbe, HealthStatus, NotReadyReason, ProbeScope};
pub use quantity::{ResourceList, ResourceRequirements};
pub use templates::{FaultTemplates, RenderedFault};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Remedy Chaos
    pub use crate::{
        BaselineGuard, ClusterApi, ClusterError, ClusterProbe, FaultInjector, HealthStatus,
        RecoveryChecks,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
