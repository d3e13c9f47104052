//! Error types for Remedy Core
//!
//! Errors are classified by how far they reach:
//! - Iteration scope: the remediation loop may try again
//! - Trial scope: the trial ends, the run continues
//! - Run scope: the whole run stops

use std::path::PathBuf;

/// How far an error propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorScope {
    /// Recoverable inside the remediation loop
    Iteration,
    /// Ends the current trial only
    Trial,
    /// Ends the run
    Run,
}

/// Main harness error type
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Environment never became ready
    #[error("setup failed: {0}")]
    Setup(String),

    /// Fault could not be applied or confirmed
    #[error("injection failed: {0}")]
    Injection(String),

    /// Remediation action could not run
    #[error("execution failed: {0}")]
    Execution(String),

    /// The environment is still degraded after an action
    #[error("environment has not recovered")]
    VerificationFailure,

    /// Remediation budget exhausted
    #[error("remediation budget exhausted after {attempts} attempts")]
    ExhaustedBudget { attempts: u32 },

    /// Trial deadline expired
    #[error("trial timed out after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Cluster or harness infrastructure unusable
    #[error("infrastructure unavailable: {0}")]
    Infra(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Experiment plan error
    #[error("invalid experiment plan: {0}")]
    Plan(#[from] SpecParseError),

    /// Trace persistence error
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),
}

impl HarnessError {
    /// Propagation scope of this error
    #[must_use]
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::Execution(_) | Self::VerificationFailure => ErrorScope::Iteration,
            Self::Setup(_)
            | Self::Injection(_)
            | Self::ExhaustedBudget { .. }
            | Self::Timeout { .. } => ErrorScope::Trial,
            Self::Infra(_) | Self::Config(_) | Self::Plan(_) | Self::Trace(_) => ErrorScope::Run,
        }
    }

    /// Check if the remediation loop may retry after this error
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.scope() == ErrorScope::Iteration
    }

    /// Check if this error must end the run
    #[inline]
    #[must_use]
    pub fn is_run_fatal(&self) -> bool {
        self.scope() == ErrorScope::Run
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("cannot parse config: {0}")]
    Parse(String),

    /// A field holds an unusable value
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// Environment has no catalog
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    /// Hosted backend selected without credentials
    #[error("missing API key (set {0})")]
    MissingApiKey(&'static str),
}

impl ConfigError {
    /// Shorthand for an invalid field
    #[inline]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Experiment file errors
#[derive(Debug, thiserror::Error)]
pub enum SpecParseError {
    /// Unknown fault category
    #[error("unknown fault category: {0}")]
    UnknownCategory(String),

    /// Malformed `key=value` token
    #[error("line {line}: invalid parameter {token:?}")]
    InvalidParameter { line: usize, token: String },

    /// Too many positional tokens
    #[error("line {line}: unexpected token {token:?}")]
    UnexpectedToken { line: usize, token: String },

    /// No target given and the catalog has none for the category
    #[error("no target available for {category} in environment {env}")]
    NoTarget { category: String, env: String },

    /// Experiment file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Trace persistence errors
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// Filesystem failure
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization failure
    #[error("cannot serialize trace: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_errors_stay_inside_the_loop() {
        assert!(HarnessError::Execution("playbook failed".into()).is_recoverable());
        assert!(HarnessError::VerificationFailure.is_recoverable());
        assert!(!HarnessError::Setup("x".into()).is_recoverable());
    }

    #[test]
    fn infra_errors_end_the_run() {
        assert!(HarnessError::Infra("cluster unreachable".into()).is_run_fatal());
        assert!(!HarnessError::Injection("x".into()).is_run_fatal());
        assert_eq!(
            HarnessError::Timeout { duration_secs: 5 }.scope(),
            ErrorScope::Trial
        );
    }

    #[test]
    fn config_error_converts_into_harness_error() {
        let err: HarnessError = ConfigError::invalid("experiments", "must be positive").into();
        assert!(matches!(err, HarnessError::Config(_)));
        assert!(err.to_string().contains("experiments"));
    }
}
