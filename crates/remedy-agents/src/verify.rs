//! Verification role

use async_trait::async_trait;
use remedy_chaos::RecoveryChecks;
use remedy_core::{DiagnosisReport, TargetSelector, VerificationOutcome};
use std::time::Duration;

/// Verification result with the evidence behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: VerificationOutcome,
    pub detail: String,
}

impl Verdict {
    /// Recovered
    #[must_use]
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            outcome: VerificationOutcome::Success,
            detail: detail.into(),
        }
    }

    /// Still faulty
    #[must_use]
    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            outcome: VerificationOutcome::Failure,
            detail: detail.into(),
        }
    }
}

/// Judges whether the incident is resolved
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Evaluate the environment after an action
    async fn verify(&self, report: &DiagnosisReport) -> Verdict;
}

/// Verifier backed by the per-category recovery checks
#[derive(Debug, Clone)]
pub struct ClusterVerifier {
    checks: RecoveryChecks,
    settle_delay: Duration,
    window: Duration,
    interval: Duration,
}

impl ClusterVerifier {
    /// Verifier with a 10 s settle delay and a single check
    #[must_use]
    pub fn new(checks: RecoveryChecks) -> Self {
        Self {
            checks,
            settle_delay: Duration::from_secs(10),
            window: Duration::ZERO,
            interval: Duration::from_secs(5),
        }
    }

    /// With the pause between an action and its verification
    #[must_use]
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// With a window in which recovery may still be observed
    #[must_use]
    pub fn with_window(mut self, window: Duration, interval: Duration) -> Self {
        self.window = window;
        self.interval = interval;
        self
    }
}

#[async_trait]
impl Verifier for ClusterVerifier {
    async fn verify(&self, report: &DiagnosisReport) -> Verdict {
        tokio::time::sleep(self.settle_delay).await;
        let target = TargetSelector::new(&report.namespace, &report.root_cause);
        match self
            .checks
            .wait_recovered(report.category, &target, self.window, self.interval)
            .await
        {
            Ok(check) if check.recovered => Verdict::success(check.detail),
            Ok(check) => Verdict::failure(check.detail),
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "recovery check failed");
                Verdict::failure(format!("recovery check failed: {e}"))
            }
        }
    }
}
