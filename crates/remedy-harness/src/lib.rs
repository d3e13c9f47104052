//! Remedy Harness - runs the remediation benchmark
//!
//! - [`TrialOrchestrator`]: one trial from readiness wait to persisted trace
//! - [`CleanupScope`]: revert and restore on every exit path of a trial
//! - [`ExperimentScheduler`]: the plan, trial by trial, halting on infrastructure loss
//! - [`RunSummary`]: outcome counts and success statistics
//! - [`cli`]: the `remedy-harness` command line
//!
//! # Example
//!
//! ```rust,ignore
//! use remedy_harness::{ExperimentScheduler, TrialOrchestrator};
//!
//! let orchestrator = TrialOrchestrator::new(config, env, cluster, restarter, strategy);
//! let report = ExperimentScheduler::new(orchestrator).run(&plan).await?;
//! println!("{}", report.summary.generate_text());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cleanup;
pub mod cli;
pub mod orchestrator;
pub mod scheduler;
pub mod summary;

pub use cleanup::CleanupScope;
pub use orchestrator::{outcome_for, ClusterRestarter, TrialOrchestrator};
pub use scheduler::{ExperimentScheduler, HaltReason, RunReport};
pub use summary::{Averages, CategoryStats, RunSummary};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Remedy Harness
    pub use crate::{ExperimentScheduler, RunReport, RunSummary, TrialOrchestrator};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
