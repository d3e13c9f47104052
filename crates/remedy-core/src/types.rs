//! Core types for the remediation benchmark
//!
//! Defines the records that flow through a trial:
//! - What to break (`FailureSpec`) and where (`TargetSelector`)
//! - What was broken (`InjectionRecord`) and how to undo it (`CleanupHandle`)
//! - What the remediation loop did (`RemediationAttempt`)
//! - How the trial ended (`TrialOutcome`, `TrialResult`)

use crate::error::SpecParseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use ulid::Ulid;

/// Unique trial identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrialId(pub Ulid);

impl TrialId {
    /// Generate new trial ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TrialId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fault categories understood by the injector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    /// Saturate the CPU of the target containers
    CpuStress,
    /// Allocate memory inside the target containers
    MemoryStress,
    /// Add latency to file-system operations of a stateful workload
    DiskIo,
    /// Drop packets leaving the target pods
    NetworkLoss,
    /// Delay packets leaving the target pods
    NetworkDelay,
    /// Make the target pods unavailable
    PodFail,
    /// Shrink the declared resources of the target workload
    PodConfigError,
}

impl FailureCategory {
    /// Every category, in catalog order
    pub const ALL: [Self; 7] = [
        Self::CpuStress,
        Self::MemoryStress,
        Self::DiskIo,
        Self::NetworkLoss,
        Self::NetworkDelay,
        Self::PodFail,
        Self::PodConfigError,
    ];

    /// Stable identifier used in experiment files and trace names
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CpuStress => "cpu-stress",
            Self::MemoryStress => "memory-stress",
            Self::DiskIo => "disk-io",
            Self::NetworkLoss => "network-loss",
            Self::NetworkDelay => "network-delay",
            Self::PodFail => "pod-fail",
            Self::PodConfigError => "pod-config-error",
        }
    }

    /// Broad family of the fault
    #[inline]
    #[must_use]
    pub fn family(self) -> FaultFamily {
        match self {
            Self::CpuStress | Self::MemoryStress | Self::DiskIo => FaultFamily::Resource,
            Self::NetworkLoss | Self::NetworkDelay => FaultFamily::Network,
            Self::PodFail => FaultFamily::Pod,
            Self::PodConfigError => FaultFamily::Configuration,
        }
    }

    /// Whether the fault is realized as a standalone chaos resource
    ///
    /// Configuration faults mutate the workload itself and are undone by the
    /// baseline restore instead of a resource deletion.
    #[inline]
    #[must_use]
    pub fn uses_chaos_resource(self) -> bool {
        !matches!(self, Self::PodConfigError)
    }

    /// Human readable symptom handed to the remediation strategy
    #[must_use]
    pub fn symptom(self) -> &'static str {
        match self {
            Self::CpuStress => "CPU usage of the service is abnormally high",
            Self::MemoryStress => "memory usage of the service is abnormally high",
            Self::DiskIo => "disk read/write of the service is abnormally slow",
            Self::NetworkLoss => "network packets of the service are being lost",
            Self::NetworkDelay => "network latency of the service is abnormally high",
            Self::PodFail => "pods of the service are failing or not ready",
            Self::PodConfigError => "the service is misconfigured and starved of resources",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureCategory {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| SpecParseError::UnknownCategory(s.trim().to_string()))
    }
}

/// Fault family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultFamily {
    /// CPU, memory or disk pressure
    Resource,
    /// Packet loss or delay
    Network,
    /// Pod availability
    Pod,
    /// Declared configuration
    Configuration,
}

/// Workload a fault is aimed at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSelector {
    /// Namespace holding the workload
    pub namespace: String,
    /// Value of the workload's `app` label
    pub workload: String,
}

impl TargetSelector {
    /// Create new target selector
    #[inline]
    #[must_use]
    pub fn new(namespace: impl Into<String>, workload: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            workload: workload.into(),
        }
    }

    /// Label selector matching the workload's pods
    #[inline]
    #[must_use]
    pub fn label_selector(&self) -> String {
        format!("app={}", self.workload)
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.workload)
    }
}

/// Optional knobs substituted into fault templates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultParameters {
    /// Intensity (workers, bytes, loss percentage, latency)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<String>,
    /// How long the chaos resource stays active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Container to aim at when the pod runs several
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

/// One experiment: which fault, against what
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSpec {
    /// Stable experiment identifier
    pub experiment_id: String,
    /// Fault category
    pub category: FailureCategory,
    /// Targeted workload
    pub target: TargetSelector,
    /// Template parameters
    #[serde(default)]
    pub parameters: FaultParameters,
}

impl FailureSpec {
    /// Create new failure spec with default parameters
    #[inline]
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        category: FailureCategory,
        target: TargetSelector,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            category,
            target,
            parameters: FaultParameters::default(),
        }
    }

    /// With template parameters
    #[inline]
    #[must_use]
    pub fn with_parameters(mut self, parameters: FaultParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Readiness requirements of an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessCriteria {
    /// Restricts the readiness check to matching pods
    pub selector: Option<String>,
    /// Require the metrics pipeline to report usage
    pub require_metrics: bool,
}

impl Default for LivenessCriteria {
    fn default() -> Self {
        Self {
            selector: None,
            require_metrics: true,
        }
    }
}

/// Deployed environment under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    /// Environment identifier (e.g. `train-ticket`)
    pub env_id: String,
    /// Namespace the environment is deployed into
    pub namespace: String,
    /// Reference manifest of the deployment
    pub manifest_path: Option<PathBuf>,
    /// Readiness requirements
    pub liveness: LivenessCriteria,
}

impl EnvironmentHandle {
    /// Create new environment handle
    #[inline]
    #[must_use]
    pub fn new(env_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            env_id: env_id.into(),
            namespace: namespace.into(),
            manifest_path: None,
            liveness: LivenessCriteria::default(),
        }
    }

    /// With reference manifest
    #[inline]
    #[must_use]
    pub fn with_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }

    /// With liveness criteria
    #[inline]
    #[must_use]
    pub fn with_liveness(mut self, liveness: LivenessCriteria) -> Self {
        self.liveness = liveness;
        self
    }
}

/// Kind and name of a workload controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    /// Controller kind (`Deployment`, `StatefulSet`)
    pub kind: String,
    /// Controller name
    pub name: String,
}

impl WorkloadRef {
    /// Reference a deployment
    #[inline]
    #[must_use]
    pub fn deployment(name: impl Into<String>) -> Self {
        Self {
            kind: "Deployment".to_string(),
            name: name.into(),
        }
    }
}

/// Lifecycle of an injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionState {
    /// The fault is live
    Applied,
    /// The fault has been withdrawn
    RolledBack,
}

/// How an injection is undone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CleanupHandle {
    /// Delete the chaos resource that realizes the fault
    DeleteResource {
        /// Resource kind
        resource_kind: String,
        /// Resource name
        name: String,
        /// Strip finalizers when a plain deletion hangs
        clear_finalizers_on_stall: bool,
    },
    /// The fault mutated the workload; the baseline restore undoes it
    RestoreFromBaseline {
        /// Mutated workload
        workload: WorkloadRef,
    },
}

/// Record of one applied fault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionRecord {
    /// What was injected
    pub spec: FailureSpec,
    /// When the fault was applied
    pub injected_at: DateTime<Utc>,
    /// Current lifecycle state
    pub state: InjectionState,
    /// How to undo the fault
    pub cleanup: CleanupHandle,
}

impl InjectionRecord {
    /// Create a record for a freshly applied fault
    #[inline]
    #[must_use]
    pub fn applied(spec: FailureSpec, cleanup: CleanupHandle) -> Self {
        Self {
            spec,
            injected_at: Utc::now(),
            state: InjectionState::Applied,
            cleanup,
        }
    }

    /// Whether the fault is still live
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.state == InjectionState::Applied
    }

    /// Mark the fault as withdrawn
    #[inline]
    pub fn mark_rolled_back(&mut self) {
        self.state = InjectionState::RolledBack;
    }
}

/// What the strategy is told about the incident
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisReport {
    /// Namespace of the faulty workload
    pub namespace: String,
    /// Faulty workload (root cause location)
    pub root_cause: String,
    /// Fault category
    pub category: FailureCategory,
    /// Observed symptom
    pub symptom: String,
    /// When the symptom was confirmed
    pub observed_at: DateTime<Utc>,
}

impl DiagnosisReport {
    /// Build a report for a confirmed injection
    #[must_use]
    pub fn for_spec(spec: &FailureSpec) -> Self {
        Self {
            namespace: spec.target.namespace.clone(),
            root_cause: spec.target.workload.clone(),
            category: spec.category,
            symptom: spec.category.symptom().to_string(),
            observed_at: Utc::now(),
        }
    }

    /// Incident line handed to the language backend
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "Root cause: service {} in namespace {}. Fault type: {}. Symptom: {}.",
            self.root_cause, self.namespace, self.category, self.symptom
        )
    }
}

/// Environment facts the strategy may rely on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryContext {
    /// Description of the runtime (orchestrator flavor, topology)
    pub runtime_description: String,
    /// Inventory the executor connects with
    pub inventory: String,
    /// Free-form notes
    pub notes: Vec<String>,
}

/// Declarative remediation program produced by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationAction {
    /// Playbook source
    pub code: String,
}

impl RemediationAction {
    /// Wrap playbook source
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    /// Whether the program has no content
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.code.trim().is_empty()
    }
}

/// Result of handing an action to the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The executor ran the action to completion
    Succeeded,
    /// The executor ran the action and it failed
    Failed,
    /// No runnable action was produced this iteration
    NotProduced,
}

/// Result of the post-action recovery check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// The environment has recovered
    Success,
    /// The symptom persists
    Failure,
}

impl VerificationOutcome {
    /// Whether the environment recovered
    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// One (action, execution, verification) triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationAttempt {
    /// Zero-based iteration index
    pub iteration: u32,
    /// Proposed action, if one was produced
    pub action: Option<RemediationAction>,
    /// Executor result
    pub execution: ExecutionStatus,
    /// Executor output or the reason nothing ran
    pub execution_output: String,
    /// Verifier result
    pub verification: VerificationOutcome,
    /// Diagnostic probe rounds spent before proposing
    pub probe_rounds: u32,
    /// When the iteration started
    pub started_at: DateTime<Utc>,
}

/// Outcome kind without payload, used for tallies
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Recovered,
    ExhaustedBudget,
    SetupError,
    InjectionError,
    Timeout,
    Aborted,
    InfraError,
}

impl OutcomeKind {
    /// Every kind, in report order
    pub const ALL: [Self; 7] = [
        Self::Recovered,
        Self::ExhaustedBudget,
        Self::SetupError,
        Self::InjectionError,
        Self::Timeout,
        Self::Aborted,
        Self::InfraError,
    ];

    /// Stable identifier
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recovered => "recovered",
            Self::ExhaustedBudget => "exhausted-budget",
            Self::SetupError => "setup-error",
            Self::InjectionError => "injection-error",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::InfraError => "infra-error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a trial ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TrialOutcome {
    /// The strategy restored the environment
    Recovered,
    /// Every allowed iteration failed verification
    ExhaustedBudget,
    /// The environment never became ready
    SetupError {
        /// Why setup failed
        reason: String,
    },
    /// The fault could not be applied or confirmed
    InjectionError {
        /// Why injection failed
        reason: String,
    },
    /// The trial deadline expired during remediation
    Timeout,
    /// The remediation task panicked
    Aborted {
        /// Panic message
        reason: String,
    },
    /// The cluster or harness infrastructure is unusable; ends the run
    InfraError {
        /// What became unreachable
        reason: String,
    },
}

impl TrialOutcome {
    /// Kind without payload
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Recovered => OutcomeKind::Recovered,
            Self::ExhaustedBudget => OutcomeKind::ExhaustedBudget,
            Self::SetupError { .. } => OutcomeKind::SetupError,
            Self::InjectionError { .. } => OutcomeKind::InjectionError,
            Self::Timeout => OutcomeKind::Timeout,
            Self::Aborted { .. } => OutcomeKind::Aborted,
            Self::InfraError { .. } => OutcomeKind::InfraError,
        }
    }

    /// Whether the trial counts as a remediation success
    #[inline]
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered)
    }

    /// Whether the remediation strategy was given a chance to run
    ///
    /// Setup and injection failures say nothing about the strategy and are
    /// reported apart from remediation failures.
    #[inline]
    #[must_use]
    pub fn strategy_ran(&self) -> bool {
        matches!(
            self,
            Self::Recovered | Self::ExhaustedBudget | Self::Timeout | Self::Aborted { .. }
        )
    }

    /// Whether the run must stop after this trial
    #[inline]
    #[must_use]
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::InfraError { .. })
    }
}

impl fmt::Display for TrialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetupError { reason }
            | Self::InjectionError { reason }
            | Self::Aborted { reason }
            | Self::InfraError { reason } => write!(f, "{}: {reason}", self.kind()),
            _ => write!(f, "{}", self.kind()),
        }
    }
}

/// What cleanup managed to do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// The injection was reverted (or there was none)
    pub reverted: bool,
    /// The baseline was restored (or there was none to restore)
    pub restored: bool,
    /// Cleanup failures, in order
    pub errors: Vec<String>,
    /// A failure left the environment in an unknown state
    pub environment_dirty: bool,
}

impl CleanupReport {
    /// Report for a trial that never touched the environment
    #[inline]
    #[must_use]
    pub fn nothing_to_clean() -> Self {
        Self {
            reverted: true,
            restored: true,
            errors: Vec::new(),
            environment_dirty: false,
        }
    }

    /// Whether every cleanup step succeeded
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.reverted && self.restored && self.errors.is_empty()
    }
}

/// Immutable record of one finished trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Trial identifier
    pub trial_id: TrialId,
    /// Experiment that was run
    pub spec: FailureSpec,
    /// Remediation attempts, in order
    pub attempts: Vec<RemediationAttempt>,
    /// Final outcome
    pub outcome: TrialOutcome,
    /// When the trial started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the whole trial
    pub duration: Duration,
    /// Time spent inside the remediation strategy
    pub remediation_time: Duration,
    /// Where the conversation trace was written
    pub trace_path: Option<PathBuf>,
    /// Rough token count of the conversation
    pub token_estimate: usize,
    /// What cleanup did
    pub cleanup: CleanupReport,
}

impl TrialResult {
    /// Number of remediation attempts
    #[inline]
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.attempts.len()
    }
}
