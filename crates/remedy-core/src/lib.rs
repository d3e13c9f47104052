//! Remedy Core - shared vocabulary of the remediation benchmark
//!
//! Everything the other crates agree on lives here:
//! - Failure specifications and the fault category taxonomy
//! - Injection records and cleanup handles
//! - Remediation attempts, trial outcomes and trial results
//! - Harness configuration (defaults, TOML file, CLI overrides)
//! - Environment catalogs and experiment plans
//! - Conversation traces and their on-disk persistence
//!
//! # Example
//!
//! ```rust,ignore
//! use remedy_core::{EnvironmentCatalog, ExperimentPlan, HarnessConfig};
//!
//! let config = HarnessConfig::default();
//! let catalog = EnvironmentCatalog::for_env(&config.env).expect("known environment");
//! let plan = ExperimentPlan::from_config(&config, &catalog)?;
//! println!("{} experiments scheduled", plan.len());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod experiment;
pub mod trace;
pub mod types;

pub use catalog::EnvironmentCatalog;
pub use config::{HarnessConfig, HealthPolicy, InjectionRetryPolicy, RemediationMethod};
pub use error::{ConfigError, ErrorScope, HarnessError, SpecParseError, TraceError};
pub use experiment::ExperimentPlan;
pub use trace::{ChatMessage, ChatRole, ConversationTrace, TraceStore};
pub use types::{
    AuxiliaryContext, CleanupHandle, CleanupReport, DiagnosisReport, EnvironmentHandle,
    ExecutionStatus, FailureCategory, FailureSpec, FaultFamily, FaultParameters,
    InjectionRecord, InjectionState, LivenessCriteria, OutcomeKind, RemediationAction,
    RemediationAttempt, TargetSelector, TrialId, TrialOutcome, TrialResult,
    VerificationOutcome, WorkloadRef,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Remedy Core
    pub use crate::{
        ConversationTrace, DiagnosisReport, EnvironmentHandle, FailureCategory, FailureSpec,
        HarnessConfig, HarnessError, RemediationAttempt, TrialOutcome, TrialResult,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
