//! Run-level statistics

use remedy_core::{OutcomeKind, TrialResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Per-category remediation tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    /// Trials whose fault was confirmed and handed to the strategy
    pub remediated: usize,
    /// Of those, trials that recovered
    pub recovered: usize,
}

impl CategoryStats {
    /// Recovered / remediated, zero when nothing was remediated
    #[must_use]
    pub fn ratio(&self) -> f64 {
        ratio(self.recovered, self.remediated)
    }
}

/// Averages over a set of trials
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Averages {
    pub attempts: f64,
    pub remediation_secs: f64,
    pub tokens: f64,
}

impl Averages {
    fn over<'a>(results: impl Iterator<Item = &'a TrialResult>) -> Self {
        let mut n = 0usize;
        let mut sum = Self::default();
        for r in results {
            n += 1;
            sum.attempts += r.iterations() as f64;
            sum.remediation_secs += r.remediation_time.as_secs_f64();
            sum.tokens += r.token_estimate as f64;
        }
        if n == 0 {
            return sum;
        }
        let n = n as f64;
        Self {
            attempts: sum.attempts / n,
            remediation_secs: sum.remediation_secs / n,
            tokens: sum.tokens / n,
        }
    }
}

/// Aggregate statistics of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Trials run
    pub total: usize,
    /// Trials per outcome kind, every kind present
    pub outcomes: BTreeMap<OutcomeKind, usize>,
    /// Trials whose fault never took hold
    pub injection_failures: usize,
    /// Trials handed to the strategy
    pub remediated: usize,
    /// Recovered / remediated
    pub success_rate: f64,
    /// Averages over recovered trials
    pub successful: Averages,
    /// Averages over remediated trials
    pub overall: Averages,
    /// Keyed by category identifier
    pub per_category: BTreeMap<String, CategoryStats>,
    /// Trials that left the environment dirty
    pub dirty_cleanups: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl RunSummary {
    /// Aggregate finished trials
    #[must_use]
    pub fn from_results(results: &[TrialResult]) -> Self {
        let mut outcomes: BTreeMap<OutcomeKind, usize> =
            OutcomeKind::ALL.iter().map(|k| (*k, 0)).collect();
        let mut per_category: BTreeMap<String, CategoryStats> = BTreeMap::new();
        for r in results {
            *outcomes.entry(r.outcome.kind()).or_default() += 1;
            if r.outcome.strategy_ran() {
                let stats = per_category
                    .entry(r.spec.category.as_str().to_string())
                    .or_default();
                stats.remediated += 1;
                if r.outcome.is_recovered() {
                    stats.recovered += 1;
                }
            }
        }

        let remediated = results.iter().filter(|r| r.outcome.strategy_ran()).count();
        let recovered = outcomes[&OutcomeKind::Recovered];
        Self {
            total: results.len(),
            injection_failures: outcomes[&OutcomeKind::InjectionError],
            remediated,
            success_rate: ratio(recovered, remediated),
            successful: Averages::over(results.iter().filter(|r| r.outcome.is_recovered())),
            overall: Averages::over(results.iter().filter(|r| r.outcome.strategy_ran())),
            per_category,
            dirty_cleanups: results
                .iter()
                .filter(|r| r.cleanup.environment_dirty)
                .count(),
            outcomes,
        }
    }

    /// Count of one outcome kind
    #[must_use]
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.get(&kind).copied().unwrap_or(0)
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Remediation Run Summary ===\n\n");
        let _ = writeln!(report, "Trials: {}", self.total);
        let _ = writeln!(report, "Injection Failures: {}", self.injection_failures);
        let _ = writeln!(report, "Remediated: {}", self.remediated);
        let _ = writeln!(
            report,
            "Success Rate: {:.2}% ({}/{})",
            self.success_rate * 100.0,
            self.count(OutcomeKind::Recovered),
            self.remediated
        );
        if self.dirty_cleanups > 0 {
            let _ = writeln!(report, "Dirty Cleanups: {}", self.dirty_cleanups);
        }

        report.push_str("\n=== Outcomes ===\n");
        for (kind, n) in &self.outcomes {
            let _ = writeln!(report, "{kind}: {n}");
        }

        report.push_str("\n=== Averages (recovered / remediated) ===\n");
        let _ = writeln!(
            report,
            "Attempts: {:.2} / {:.2}",
            self.successful.attempts, self.overall.attempts
        );
        let _ = writeln!(
            report,
            "Remediation Time: {:.2}s / {:.2}s",
            self.successful.remediation_secs, self.overall.remediation_secs
        );
        let _ = writeln!(
            report,
            "Tokens: {:.0} / {:.0}",
            self.successful.tokens, self.overall.tokens
        );

        if !self.per_category.is_empty() {
            report.push_str("\n=== Per Category ===\n");
            for (category, stats) in &self.per_category {
                let _ = writeln!(
                    report,
                    "{category}: {}/{} ({:.2}%)",
                    stats.recovered,
                    stats.remediated,
                    stats.ratio() * 100.0
                );
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use remedy_core::{
        CleanupReport, FailureCategory, FailureSpec, TargetSelector, TrialId, TrialOutcome,
    };
    use std::time::Duration;

    fn result(category: FailureCategory, outcome: TrialOutcome, secs: u64) -> TrialResult {
        TrialResult {
            trial_id: TrialId::new(),
            spec: FailureSpec::new(
                "exp",
                category,
                TargetSelector::new("default", "ts-order-service"),
            ),
            attempts: Vec::new(),
            outcome,
            started_at: Utc::now(),
            duration: Duration::from_secs(secs),
            remediation_time: Duration::from_secs(secs),
            trace_path: None,
            token_estimate: 400,
            cleanup: CleanupReport::nothing_to_clean(),
        }
    }

    #[test]
    fn setup_and_injection_failures_do_not_count_against_the_strategy() {
        let results = vec![
            result(FailureCategory::CpuStress, TrialOutcome::Recovered, 10),
            result(FailureCategory::CpuStress, TrialOutcome::ExhaustedBudget, 30),
            result(
                FailureCategory::PodFail,
                TrialOutcome::InjectionError {
                    reason: "no symptom".into(),
                },
                0,
            ),
            result(
                FailureCategory::PodFail,
                TrialOutcome::SetupError {
                    reason: "not ready".into(),
                },
                0,
            ),
        ];
        let summary = RunSummary::from_results(&results);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.remediated, 2);
        assert_eq!(summary.injection_failures, 1);
        assert_eq!(summary.count(OutcomeKind::SetupError), 1);
        assert_eq!(summary.count(OutcomeKind::InfraError), 0);
        assert!((summary.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((summary.successful.remediation_secs - 10.0).abs() < f64::EPSILON);
        assert!((summary.overall.remediation_secs - 20.0).abs() < f64::EPSILON);
        assert_eq!(
            summary.per_category.get("cpu-stress"),
            Some(&CategoryStats {
                remediated: 2,
                recovered: 1
            })
        );
        assert!(!summary.per_category.contains_key("pod-fail"));
    }

    #[test]
    fn empty_run_reports_zeroes() {
        let summary = RunSummary::from_results(&[]);
        assert_eq!(summary.outcomes.len(), OutcomeKind::ALL.len());
        assert!(summary.success_rate.abs() < f64::EPSILON);
        let text = summary.generate_text();
        assert!(text.contains("Success Rate: 0.00% (0/0)"));
        assert!(text.contains("exhausted-budget: 0"));
    }

    #[test]
    fn text_report_lists_categories() {
        let summary = RunSummary::from_results(&[result(
            FailureCategory::MemoryStress,
            TrialOutcome::Recovered,
            5,
        )]);
        let text = summary.generate_text();
        assert!(text.starts_with("=== Remediation Run Summary ==="));
        assert!(text.contains("memory-stress: 1/1 (100.00%)"));
        assert!(text.contains("Tokens: 400 / 400"));
    }

    #[test]
    fn serializes_outcome_kinds_as_keys() {
        let summary = RunSummary::from_results(&[result(
            FailureCategory::DiskIo,
            TrialOutcome::Timeout,
            1,
        )]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["outcomes"]["timeout"], 1);
        assert_eq!(json["per_category"]["disk-io"]["remediated"], 1);
    }
}
