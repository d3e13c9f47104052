//! Remedy Agents - the remediation side of a trial
//!
//! - [`ChatBackend`]: generative backend seam, with an HTTP implementation
//!   that speaks the OpenAI, Anthropic and DashScope dialects
//! - [`ActionRunner`]: execution role, running Ansible playbooks
//! - [`DiagnosticProbe`]: read-only probe role
//! - [`Verifier`]: verification role, backed by the recovery checks
//! - [`RemediationStrategy`]: the single-shot and iterative strategies
//!
//! # Example
//!
//! ```rust,ignore
//! use remedy_agents::{IterativeStrategy, TrialBudget};
//!
//! let strategy = IterativeStrategy::new(backend, probe, runner, verifier);
//! let outcome = strategy
//!     .remediate(&report, &context, &TrialBudget::new(2), &trace)
//!     .await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod error;
pub mod probe;
pub mod runner;
pub mod strategy;
pub mod tools;
pub mod verify;

pub use backend::{BackendReply, ChatBackend, HttpChatBackend, ModelFlavor, API_KEY_ENV};
pub use error::{BackendError, ExecutionError, ProbeError};
pub use probe::{probe_all, DiagnosticProbe, ReadOnlyGuard, ShellProbe};
pub use runner::{validate_playbook, ActionRunner, AnsibleRunner};
pub use strategy::{
    allowed_transitions, EnvironmentRestarter, IterativeStrategy, Phase, RemediationStrategy,
    SingleShotStrategy, StrategyOutcome, StrategyVerdict, TrialBudget,
};
pub use tools::{ToolCall, ToolRequest, ToolSpec};
pub use verify::{ClusterVerifier, Verdict, Verifier};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Remedy Agents
    pub use crate::{
        ActionRunner, ChatBackend, DiagnosticProbe, RemediationStrategy, StrategyOutcome,
        StrategyVerdict, TrialBudget, Verifier,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
