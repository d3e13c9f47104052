//! Harness configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! command-line overrides applied by the binary.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Remediation strategy variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemediationMethod {
    /// Iterative multi-agent loop
    ThinkRemed,
    /// Single-shot generation
    SoloGen,
}

impl RemediationMethod {
    /// Name accepted on the command line
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThinkRemed => "ThinkRemed",
            Self::SoloGen => "SoloGen",
        }
    }

    /// Iteration ceiling when none is configured
    #[must_use]
    pub fn default_max_iterations(self) -> u32 {
        match self {
            Self::ThinkRemed => 2,
            Self::SoloGen => 1,
        }
    }
}

impl fmt::Display for RemediationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemediationMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thinkremed" | "iterative" => Ok(Self::ThinkRemed),
            "sologen" | "single-shot" | "single_shot" => Ok(Self::SoloGen),
            other => Err(ConfigError::invalid(
                "remediate_method",
                format!("unknown method {other:?} (expected ThinkRemed or SoloGen)"),
            )),
        }
    }
}

/// What to do when a fault cannot be confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InjectionRetryPolicy {
    /// Record an injection error
    Fail,
    /// Redeploy the environment and inject once more
    RestartOnce,
}

impl FromStr for InjectionRetryPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "restart-once" | "restart_once" | "restart" => Ok(Self::RestartOnce),
            other => Err(ConfigError::invalid(
                "injection_retry",
                format!("unknown policy {other:?} (expected fail or restart-once)"),
            )),
        }
    }
}

/// Readiness polling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    /// Delay between scheduling/readiness polls
    pub interval_secs: u64,
    /// Delay between polls while metrics are still warming up
    pub metrics_interval_secs: u64,
    /// Maximum number of polls
    pub max_attempts: u32,
    /// Consecutive probe failures that mark the cluster unreachable
    ///
    /// The default of 1 aborts on the first failed query.
    pub unavailable_tolerance: u32,
}

impl HealthPolicy {
    /// Interval between polls
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Interval while waiting for metrics
    #[inline]
    #[must_use]
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            metrics_interval_secs: 5,
            max_attempts: 60,
            unavailable_tolerance: 1,
        }
    }
}

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of experiments to run
    pub experiments: usize,
    /// Namespace of the environment
    pub namespace: String,
    /// Poll interval while confirming injection and recovery
    pub wait_interval_secs: u64,
    /// Time allowed for a fault to manifest
    pub injection_timeout_secs: u64,
    /// Environment identifier
    pub env: String,
    /// Directory for conversation traces
    pub save_path: PathBuf,
    /// Reference manifest of the environment
    pub manifest_path: PathBuf,
    /// Remediation strategy
    pub remediate_method: RemediationMethod,
    /// Experiment file; random experiments when absent
    pub experiment_path: Option<PathBuf>,
    /// Redeploy the environment after failed actions and unconfirmed injections
    pub enable_strict_restart: bool,
    /// Explicit injection retry policy
    pub injection_retry: Option<InjectionRetryPolicy>,
    /// Language model name; empty selects the local endpoint
    pub model: String,
    /// Override of the language backend endpoint
    pub api_base: Option<String>,
    /// Readiness polling
    pub health: HealthPolicy,
    /// Iteration ceiling override
    pub max_iterations: Option<u32>,
    /// Diagnostic probe rounds allowed per iteration
    pub max_probe_rounds: u32,
    /// Wall-clock deadline of the remediation phase
    pub trial_timeout_secs: u64,
    /// Delay between executing an action and verifying it
    pub settle_delay_secs: u64,
    /// Window during which verification polls for recovery
    pub verify_window_secs: u64,
    /// Playbook execution timeout
    pub playbook_timeout_secs: u64,
    /// Diagnostic command timeout
    pub probe_timeout_secs: u64,
    /// Inventory passed to the executor
    pub inventory_path: PathBuf,
    /// Working directory for generated playbooks
    pub workdir: PathBuf,
    /// Directory of fault template overrides
    pub template_dir: Option<PathBuf>,
    /// Directory holding `<env>/deploy.sh`
    pub envs_root: PathBuf,
    /// Deploy the environment before every trial
    pub redeploy_each_trial: bool,
    /// Seed for random experiment plans
    pub seed: Option<u64>,
    /// Cluster CLI binary
    pub kubectl: String,
    /// Cluster credentials
    pub kubeconfig: Option<PathBuf>,
    /// Runtime description handed to the strategy
    pub runtime_description: String,
}

impl HarnessConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text, filling gaps with defaults
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// With remediation method
    #[inline]
    #[must_use]
    pub fn with_method(mut self, method: RemediationMethod) -> Self {
        self.remediate_method = method;
        self
    }

    /// With namespace
    #[inline]
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// With strict restart
    #[inline]
    #[must_use]
    pub fn with_strict_restart(mut self, enabled: bool) -> Self {
        self.enable_strict_restart = enabled;
        self
    }

    /// With iteration ceiling
    #[inline]
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Reject unusable values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiments == 0 {
            return Err(ConfigError::invalid("experiments", "must be at least 1"));
        }
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::invalid("namespace", "must not be empty"));
        }
        if self.wait_interval_secs == 0 {
            return Err(ConfigError::invalid("wait_interval_secs", "must be positive"));
        }
        if self.health.max_attempts == 0 {
            return Err(ConfigError::invalid("health.max_attempts", "must be at least 1"));
        }
        if self.max_iterations == Some(0) {
            return Err(ConfigError::invalid("max_iterations", "must be at least 1"));
        }
        if self.trial_timeout_secs == 0 {
            return Err(ConfigError::invalid("trial_timeout_secs", "must be positive"));
        }
        Ok(())
    }

    /// Effective injection retry policy
    ///
    /// An explicit policy wins; otherwise strict restart implies one retry.
    #[must_use]
    pub fn injection_retry_policy(&self) -> InjectionRetryPolicy {
        self.injection_retry.unwrap_or(if self.enable_strict_restart {
            InjectionRetryPolicy::RestartOnce
        } else {
            InjectionRetryPolicy::Fail
        })
    }

    /// Effective iteration ceiling of the configured method
    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        match self.remediate_method {
            RemediationMethod::SoloGen => 1,
            RemediationMethod::ThinkRemed => self
                .max_iterations
                .unwrap_or_else(|| self.remediate_method.default_max_iterations()),
        }
    }

    /// Poll interval while confirming faults
    #[inline]
    #[must_use]
    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_secs)
    }

    /// Injection confirmation timeout
    #[inline]
    #[must_use]
    pub fn injection_timeout(&self) -> Duration {
        Duration::from_secs(self.injection_timeout_secs)
    }

    /// Remediation deadline
    #[inline]
    #[must_use]
    pub fn trial_timeout(&self) -> Duration {
        Duration::from_secs(self.trial_timeout_secs)
    }

    /// Settle delay before verification
    #[inline]
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Verification window
    #[inline]
    #[must_use]
    pub fn verify_window(&self) -> Duration {
        Duration::from_secs(self.verify_window_secs)
    }

    /// Playbook timeout
    #[inline]
    #[must_use]
    pub fn playbook_timeout(&self) -> Duration {
        Duration::from_secs(self.playbook_timeout_secs)
    }

    /// Diagnostic command timeout
    #[inline]
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            experiments: 100,
            namespace: "default".to_string(),
            wait_interval_secs: 10,
            injection_timeout_secs: 30,
            env: "train-ticket".to_string(),
            save_path: PathBuf::from("conversations"),
            manifest_path: PathBuf::from("envs/source-config/train-ticket-config.yaml"),
            remediate_method: RemediationMethod::ThinkRemed,
            experiment_path: None,
            enable_strict_restart: false,
            injection_retry: None,
            model: String::new(),
            api_base: None,
            health: HealthPolicy::default(),
            max_iterations: None,
            max_probe_rounds: 5,
            trial_timeout_secs: 1800,
            settle_delay_secs: 10,
            verify_window_secs: 60,
            playbook_timeout_secs: 300,
            probe_timeout_secs: 10,
            inventory_path: PathBuf::from("inventory.ini"),
            workdir: PathBuf::from("."),
            template_dir: None,
            envs_root: PathBuf::from("envs"),
            redeploy_each_trial: false,
            seed: None,
            kubectl: "kubectl".to_string(),
            kubeconfig: None,
            runtime_description: "The microservice system runs on a k3s cluster.".to_string(),
        }
    }
}
