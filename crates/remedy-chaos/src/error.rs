//! Error types for cluster access, injection and restore

use remedy_core::HarnessError;

/// Cluster access errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterError {
    /// The cluster API cannot be reached at all
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    /// A cluster command ran and failed
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The requested object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The cluster answered with something unparseable
    #[error("unexpected cluster response: {0}")]
    Parse(String),

    /// A cluster command did not finish in time
    #[error("cluster command timed out after {0}s")]
    Timeout(u64),
}

impl ClusterError {
    /// Whether the cluster itself is unusable
    #[inline]
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Readiness wait errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum HealthWaitError {
    /// Not ready after every allowed poll
    #[error("environment not ready after {attempts} polls (last: {last})")]
    NotReady { attempts: u32, last: String },

    /// The probe itself kept failing
    #[error("readiness probe unavailable: {0}")]
    Unavailable(String),
}

impl From<HealthWaitError> for HarnessError {
    fn from(err: HealthWaitError) -> Self {
        match err {
            HealthWaitError::NotReady { .. } => Self::Setup(err.to_string()),
            HealthWaitError::Unavailable(reason) => Self::Infra(reason),
        }
    }
}

/// Fault injection errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum InjectionError {
    /// The target already carries a live fault
    #[error("target {namespace}/{workload} already has an active injection")]
    AlreadyInjected { namespace: String, workload: String },

    /// The fault template is missing or malformed
    #[error("template error: {0}")]
    Template(String),

    /// The target workload could not be resolved
    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    /// Applying the fault failed
    #[error("apply failed: {0}")]
    Apply(ClusterError),

    /// Withdrawing the fault failed
    #[error("revert failed: {0}")]
    Revert(ClusterError),
}

impl InjectionError {
    /// Whether the failure stems from an unreachable cluster
    #[must_use]
    pub fn is_infra(&self) -> bool {
        match self {
            Self::Apply(e) | Self::Revert(e) => e.is_unreachable(),
            _ => false,
        }
    }
}

impl From<InjectionError> for HarnessError {
    fn from(err: InjectionError) -> Self {
        if err.is_infra() {
            Self::Infra(err.to_string())
        } else {
            Self::Injection(err.to_string())
        }
    }
}

/// Baseline snapshot and restore errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BaselineError {
    /// Cluster access failed
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// The reference manifest could not be loaded
    #[error("manifest error: {0}")]
    Manifest(String),

    /// The workload did not come back after restore
    #[error("workload not ready after restore: {0}")]
    NotReady(#[from] HealthWaitError),
}

impl BaselineError {
    /// Whether the failure stems from an unreachable cluster
    #[must_use]
    pub fn is_infra(&self) -> bool {
        match self {
            Self::Cluster(e) => e.is_unreachable(),
            Self::NotReady(HealthWaitError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

impl From<BaselineError> for HarnessError {
    fn from(err: BaselineError) -> Self {
        if err.is_infra() {
            Self::Infra(err.to_string())
        } else {
            Self::Setup(err.to_string())
        }
    }
}

/// Environment deployment errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeployError {
    /// The deploy script could not be started
    #[error("cannot launch deploy script {script}: {reason}")]
    Launch { script: String, reason: String },

    /// The deploy script exited unsuccessfully
    #[error("deploy script {script} failed: {output}")]
    Failed { script: String, output: String },

    /// The deploy script ran past its timeout
    #[error("deploy script timed out after {0}s")]
    Timeout(u64),
}

impl From<DeployError> for HarnessError {
    fn from(err: DeployError) -> Self {
        Self::Infra(err.to_string())
    }
}
