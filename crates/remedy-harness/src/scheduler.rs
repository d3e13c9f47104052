//! Experiment scheduling
//!
//! Trials run one after another through a single [`TrialOrchestrator`]. A
//! failed trial never stops the run; an unusable environment does.

use crate::orchestrator::TrialOrchestrator;
use crate::summary::RunSummary;
use remedy_core::{ExperimentPlan, HarnessError, OutcomeKind, TrialOutcome, TrialResult};
use std::fmt;

/// Why a run stopped before its plan was done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// A trial ended with an infrastructure error
    Infrastructure(String),
    /// Cleanup could not bring the environment back to its baseline
    DirtyEnvironment(Vec<String>),
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure(reason) => write!(f, "infrastructure failure: {reason}"),
            Self::DirtyEnvironment(errors) => {
                write!(f, "environment left dirty: {}", errors.join("; "))
            }
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Finished trials, in plan order
    pub results: Vec<TrialResult>,
    /// Aggregate statistics
    pub summary: RunSummary,
    /// Set when the run stopped early
    pub halted: Option<HaltReason>,
    /// Experiments in the plan
    pub planned: usize,
}

impl RunReport {
    /// Whether every planned experiment ran
    #[must_use]
    pub fn completed(&self) -> bool {
        self.halted.is_none()
    }
}

/// Runs a plan trial by trial
#[derive(Debug)]
pub struct ExperimentScheduler {
    orchestrator: TrialOrchestrator,
}

impl ExperimentScheduler {
    #[must_use]
    pub fn new(orchestrator: TrialOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Orchestrator trials run through
    #[must_use]
    pub fn orchestrator(&self) -> &TrialOrchestrator {
        &self.orchestrator
    }

    /// Run every experiment of `plan` in order
    ///
    /// Stops early after a trial ending in an infrastructure error or leaving
    /// the environment dirty. A trace that cannot be written is returned as
    /// an error.
    pub async fn run(&self, plan: &ExperimentPlan) -> Result<RunReport, HarnessError> {
        let planned = plan.len();
        let mut results = Vec::with_capacity(planned);
        let mut halted = None;

        for (i, spec) in plan.specs().iter().enumerate() {
            tracing::info!(
                experiment = i + 1,
                total = planned,
                category = %spec.category,
                target = %spec.target,
                "=== experiment ==="
            );
            let result = self.orchestrator.run_trial(spec).await?;

            let stop = if let TrialOutcome::InfraError { reason } = &result.outcome {
                Some(HaltReason::Infrastructure(reason.clone()))
            } else if result.cleanup.environment_dirty {
                Some(HaltReason::DirtyEnvironment(result.cleanup.errors.clone()))
            } else {
                None
            };
            results.push(result);

            if let Some(reason) = stop {
                tracing::error!(
                    reason = %reason,
                    completed = results.len(),
                    total = planned,
                    "stopping run"
                );
                halted = Some(reason);
                break;
            }
        }

        let summary = RunSummary::from_results(&results);
        tracing::info!(
            trials = summary.total,
            recovered = summary.count(OutcomeKind::Recovered),
            success_rate = summary.success_rate,
            "run finished"
        );
        Ok(RunReport {
            results,
            summary,
            halted,
            planned,
        })
    }
}
