//! Remediation strategies
//!
//! A strategy turns a [`DiagnosisReport`] and an [`AuxiliaryContext`] into a
//! sequence of [`RemediationAttempt`]s ending in one terminal verdict, within
//! the caller's iteration budget and deadline. Recoverable failures (a bad
//! playbook, a failed verification) are handled inside the strategy and
//! never escape it.

mod iterative;
mod single_shot;

pub use iterative::{allowed_transitions, IterativeStrategy, Phase};
pub use single_shot::SingleShotStrategy;

use async_trait::async_trait;
use remedy_core::{
    AuxiliaryContext, ConversationTrace, DiagnosisReport, HarnessError, RemediationAttempt,
};
use tokio::time::Instant;

/// Limits a strategy runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialBudget {
    /// T_max: attempts allowed
    pub max_iterations: u32,
    /// No new iteration starts after this instant
    pub deadline: Option<Instant>,
    /// Restart the environment after an execution error
    pub strict_restart: bool,
}

impl TrialBudget {
    /// Budget without a deadline
    #[must_use]
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            deadline: None,
            strict_restart: false,
        }
    }

    /// With a deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// With strict restart
    #[must_use]
    pub fn with_strict_restart(mut self, enabled: bool) -> Self {
        self.strict_restart = enabled;
        self
    }

    /// Whether the deadline has passed
    #[must_use]
    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// How a strategy ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyVerdict {
    /// An attempt verified successfully
    Recovered,
    /// Every allowed attempt failed verification
    ExhaustedBudget,
    /// The deadline passed before the budget was spent
    DeadlineExceeded,
}

/// Verdict plus the attempts that led to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOutcome {
    pub verdict: StrategyVerdict,
    pub attempts: Vec<RemediationAttempt>,
}

/// Forces the environment back to a fresh deployment
#[async_trait]
pub trait EnvironmentRestarter: Send + Sync {
    /// Redeploy and wait until ready
    async fn restart(&self) -> Result<(), HarnessError>;
}

/// One approach to producing and applying corrective actions
#[async_trait]
pub trait RemediationStrategy: Send + Sync {
    /// Short identifier used in logs and summaries
    fn name(&self) -> &'static str;

    /// Run until recovered, out of budget, or past the deadline
    ///
    /// Every message and attempt is recorded in `trace` as it happens. An
    /// error means the environment itself became unusable (a forced restart
    /// failed); it is never returned for a bad action or failed check.
    async fn remediate(
        &self,
        report: &DiagnosisReport,
        context: &AuxiliaryContext,
        budget: &TrialBudget,
        trace: &ConversationTrace,
    ) -> Result<StrategyOutcome, HarnessError>;
}

/// Opening instructions shared by both strategies
#[must_use]
pub fn system_prompt(
    report: &DiagnosisReport,
    context: &AuxiliaryContext,
    probing: bool,
) -> String {
    let basis = if probing {
        "the given root cause, failure category, and the probed information"
    } else {
        "the given root cause and failure category"
    };
    let mut prompt = format!(
        "You are an experienced SRE managing a microservice system.\n\
         A failure has occurred, and your task is to generate a final executable Ansible playbook based on {basis} \
         (executed by \"ansible-playbook -i inventory.ini remediation.yml\").\n\
         The system will automatically execute the playbook and verify whether the failure has been successfully resolved.\n\
         [Attention] Please ensure that online services remain uninterrupted; restarting services should not be considered a primary strategy.\n\
         {}\n\
         The content of inventory.ini is {}\n\
         The current namespace is: {}, failure root cause service is: {}, and the failure category is: {}.\n\
         Observed symptom: {}.",
        context.runtime_description,
        context.inventory,
        report.namespace,
        report.root_cause,
        report.category,
        report.symptom,
    );
    for note in &context.notes {
        prompt.push('\n');
        prompt.push_str(note);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::{FailureCategory, FailureSpec, TargetSelector};

    #[test]
    fn prompt_names_the_incident() {
        let spec = FailureSpec::new(
            "exp-001",
            FailureCategory::CpuStress,
            TargetSelector::new("default", "ts-order-service"),
        );
        let context = AuxiliaryContext {
            runtime_description: "The microservice system runs on a k3s cluster.".into(),
            inventory: "[k3s_master]\n10.0.0.1".into(),
            notes: vec!["Use kubectl on the master node.".into()],
        };
        let prompt = system_prompt(&DiagnosisReport::for_spec(&spec), &context, true);
        assert!(prompt.contains("root cause service is: ts-order-service"));
        assert!(prompt.contains("failure category is: cpu-stress"));
        assert!(prompt.contains("probed information"));
        assert!(prompt.ends_with("Use kubectl on the master node."));
    }

    #[test]
    fn budget_without_deadline_never_expires() {
        assert!(!TrialBudget::new(2).expired());
    }
}
