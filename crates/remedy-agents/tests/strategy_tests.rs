use pretty_assertions::assert_eq;
use proptest::prelude::*;
use remedy_agents::{
    ActionRunner, BackendError, ChatBackend, DiagnosticProbe, EnvironmentRestarter,
    ExecutionError, IterativeStrategy, RemediationStrategy, SingleShotStrategy, StrategyVerdict,
    TrialBudget, Verifier,
};
use remedy_core::{
    AuxiliaryContext, ChatRole, ConversationTrace, DiagnosisReport, ExecutionStatus,
    FailureCategory, HarnessError, VerificationOutcome,
};
use remedy_test_utils::{
    playbook_reply, probe_reply, spec, MockRestarter, RecordingProbe, ScriptedBackend,
    ScriptedRunner, ScriptedVerifier, PLAYBOOK,
};
use std::sync::Arc;
use tokio::time::Instant;

use remedy_core::VerificationOutcome::{Failure, Success};

struct Roles {
    backend: Arc<ScriptedBackend>,
    probe: Arc<RecordingProbe>,
    runner: Arc<ScriptedRunner>,
    verifier: Arc<ScriptedVerifier>,
}

impl Roles {
    fn new(backend: ScriptedBackend, runner: ScriptedRunner, verifier: ScriptedVerifier) -> Self {
        Self {
            backend: Arc::new(backend),
            probe: Arc::new(RecordingProbe::new()),
            runner: Arc::new(runner),
            verifier: Arc::new(verifier),
        }
    }

    fn iterative(&self) -> IterativeStrategy {
        IterativeStrategy::new(
            Arc::clone(&self.backend) as Arc<dyn ChatBackend>,
            Arc::clone(&self.probe) as Arc<dyn DiagnosticProbe>,
            Arc::clone(&self.runner) as Arc<dyn ActionRunner>,
            Arc::clone(&self.verifier) as Arc<dyn Verifier>,
        )
    }

    fn single_shot(&self) -> SingleShotStrategy {
        SingleShotStrategy::new(
            Arc::clone(&self.backend) as Arc<dyn ChatBackend>,
            Arc::clone(&self.runner) as Arc<dyn ActionRunner>,
            Arc::clone(&self.verifier) as Arc<dyn Verifier>,
        )
    }
}

fn report() -> DiagnosisReport {
    DiagnosisReport::for_spec(&spec(FailureCategory::CpuStress))
}

fn context() -> AuxiliaryContext {
    AuxiliaryContext {
        runtime_description: "The microservice system runs on a k3s cluster.".into(),
        inventory: "[k3s_master]\n10.0.0.1".into(),
        notes: Vec::new(),
    }
}

#[tokio::test]
async fn iterative_recovers_on_third_attempt() {
    let roles = Roles::new(
        ScriptedBackend::new(),
        ScriptedRunner::new(),
        ScriptedVerifier::new([Failure, Failure, Success]),
    );
    let trace = ConversationTrace::new();
    let outcome = roles
        .iterative()
        .remediate(&report(), &context(), &TrialBudget::new(3), &trace)
        .await
        .unwrap();

    assert_eq!(outcome.verdict, StrategyVerdict::Recovered);
    let verdicts: Vec<_> = outcome.attempts.iter().map(|a| a.verification).collect();
    assert_eq!(verdicts, vec![Failure, Failure, Success]);
    let indices: Vec<u32> = outcome.attempts.iter().map(|a| a.iteration).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(trace.attempts(), outcome.attempts);
    assert_eq!(roles.runner.executed().len(), 3);

    // Every retry is told why the previous attempt failed
    let retries = trace
        .messages()
        .iter()
        .filter(|m| m.role == ChatRole::User && m.content.contains("not yet been remediated"))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn iterative_stops_at_the_iteration_budget() {
    let roles = Roles::new(
        ScriptedBackend::new(),
        ScriptedRunner::new(),
        ScriptedVerifier::new([]),
    );
    let outcome = roles
        .iterative()
        .remediate(&report(), &context(), &TrialBudget::new(2), &ConversationTrace::new())
        .await
        .unwrap();
    assert_eq!(outcome.verdict, StrategyVerdict::ExhaustedBudget);
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(roles.verifier.calls(), 2);
}

#[tokio::test]
async fn probe_rounds_are_bounded_per_iteration() {
    let mut backend = ScriptedBackend::new();
    for _ in 0..3 {
        backend = backend.then(probe_reply("kubectl get pods; kubectl top pods"));
    }
    backend = backend.then(playbook_reply(PLAYBOOK));
    let roles = Roles::new(backend, ScriptedRunner::new(), ScriptedVerifier::new([Success]));
    let trace = ConversationTrace::new();

    let outcome = roles
        .iterative()
        .with_max_probe_rounds(2)
        .remediate(&report(), &context(), &TrialBudget::new(2), &trace)
        .await
        .unwrap();

    let offered = roles.backend.offered_tools();
    assert_eq!(offered[0], vec!["print_playbook", "probe_system"]);
    assert_eq!(offered[1], vec!["print_playbook", "probe_system"]);
    assert_eq!(offered[2], vec!["print_playbook"]);

    // The third probe request is refused and costs the first iteration
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].execution, ExecutionStatus::NotProduced);
    assert_eq!(outcome.attempts[0].probe_rounds, 2);
    assert_eq!(outcome.attempts[1].verification, Success);
    assert_eq!(outcome.verdict, StrategyVerdict::Recovered);

    assert_eq!(
        roles.probe.commands(),
        vec!["kubectl get pods", "kubectl top pods", "kubectl get pods", "kubectl top pods"]
    );
    let tool_messages = trace
        .messages()
        .iter()
        .filter(|m| m.role == ChatRole::Tool)
        .count();
    assert_eq!(tool_messages, 2);
}

#[tokio::test]
async fn failed_execution_triggers_strict_restart() {
    let roles = Roles::new(
        ScriptedBackend::new(),
        ScriptedRunner::new().then(Err(ExecutionError::Failed {
            exit_code: 2,
            output: "fatal: [master]: FAILED!".into(),
        })),
        ScriptedVerifier::new([Success]),
    );
    let restarter = Arc::new(MockRestarter::new());
    let outcome = roles
        .iterative()
        .with_restarter(Arc::clone(&restarter) as Arc<dyn EnvironmentRestarter>)
        .remediate(
            &report(),
            &context(),
            &TrialBudget::new(2).with_strict_restart(true),
            &ConversationTrace::new(),
        )
        .await
        .unwrap();

    assert_eq!(restarter.restarts(), 1);
    assert_eq!(outcome.attempts[0].execution, ExecutionStatus::Failed);
    assert_eq!(outcome.attempts[0].verification, Failure);
    assert!(outcome.attempts[0].execution_output.contains("exit code 2"));
    assert_eq!(outcome.verdict, StrategyVerdict::Recovered);
    // A failed execution is never verified
    assert_eq!(roles.verifier.calls(), 1);
}

#[tokio::test]
async fn execution_failure_without_strict_restart_does_not_redeploy() {
    let roles = Roles::new(
        ScriptedBackend::new(),
        ScriptedRunner::new().then(Err(ExecutionError::Malformed("not a list".into()))),
        ScriptedVerifier::new([]),
    );
    let restarter = Arc::new(MockRestarter::new());
    let outcome = roles
        .iterative()
        .with_restarter(Arc::clone(&restarter) as Arc<dyn EnvironmentRestarter>)
        .remediate(&report(), &context(), &TrialBudget::new(1), &ConversationTrace::new())
        .await
        .unwrap();
    assert_eq!(restarter.restarts(), 0);
    assert_eq!(outcome.verdict, StrategyVerdict::ExhaustedBudget);
}

#[tokio::test]
async fn failed_strict_restart_surfaces_as_infra_error() {
    let roles = Roles::new(
        ScriptedBackend::new(),
        ScriptedRunner::new().then(Err(ExecutionError::Timeout(300))),
        ScriptedVerifier::new([]),
    );
    let err = roles
        .iterative()
        .with_restarter(Arc::new(MockRestarter::failing()))
        .remediate(
            &report(),
            &context(),
            &TrialBudget::new(2).with_strict_restart(true),
            &ConversationTrace::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Infra(_)));
}

#[tokio::test]
async fn backend_outage_costs_an_iteration_not_the_trial() {
    let roles = Roles::new(
        ScriptedBackend::new().then_fail(BackendError::Status {
            status: 503,
            body: "overloaded".into(),
        }),
        ScriptedRunner::new(),
        ScriptedVerifier::new([Success]),
    );
    let outcome = roles
        .iterative()
        .remediate(&report(), &context(), &TrialBudget::new(2), &ConversationTrace::new())
        .await
        .unwrap();
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].action, None);
    assert!(outcome.attempts[0].execution_output.contains("HTTP 503"));
    assert_eq!(outcome.verdict, StrategyVerdict::Recovered);
}

#[tokio::test]
async fn expired_deadline_starts_no_iteration() {
    let roles = Roles::new(
        ScriptedBackend::new(),
        ScriptedRunner::new(),
        ScriptedVerifier::new([Success]),
    );
    let budget = TrialBudget::new(3).with_deadline(Instant::now());
    let outcome = roles
        .iterative()
        .remediate(&report(), &context(), &budget, &ConversationTrace::new())
        .await
        .unwrap();
    assert_eq!(outcome.verdict, StrategyVerdict::DeadlineExceeded);
    assert!(outcome.attempts.is_empty());
    assert_eq!(roles.backend.calls(), 0);
}

#[tokio::test]
async fn single_shot_runs_exactly_once() {
    let roles = Roles::new(
        ScriptedBackend::new(),
        ScriptedRunner::new(),
        ScriptedVerifier::new([Failure, Success]),
    );
    let trace = ConversationTrace::new();
    let outcome = roles
        .single_shot()
        .remediate(&report(), &context(), &TrialBudget::new(1), &trace)
        .await
        .unwrap();

    assert_eq!(outcome.verdict, StrategyVerdict::ExhaustedBudget);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(roles.backend.offered_tools(), vec![vec!["print_playbook".to_string()]]);
    assert_eq!(roles.verifier.calls(), 1);
    assert_eq!(trace.attempt_count(), 1);
}

#[tokio::test]
async fn single_shot_verifies_even_when_execution_fails() {
    let roles = Roles::new(
        ScriptedBackend::new(),
        ScriptedRunner::new().then(Err(ExecutionError::Failed {
            exit_code: 4,
            output: "unreachable host".into(),
        })),
        ScriptedVerifier::new([Success]),
    );
    let outcome = roles
        .single_shot()
        .remediate(&report(), &context(), &TrialBudget::new(1), &ConversationTrace::new())
        .await
        .unwrap();
    assert_eq!(outcome.attempts[0].execution, ExecutionStatus::Failed);
    assert_eq!(outcome.verdict, StrategyVerdict::Recovered);
}

proptest! {
    #[test]
    fn attempts_never_exceed_the_budget(
        max in 1u32..6,
        successes in proptest::collection::vec(any::<bool>(), 0..8),
    ) {
        let outcomes: Vec<VerificationOutcome> = successes
            .iter()
            .map(|ok| if *ok { Success } else { Failure })
            .collect();
        let first_success = successes.iter().position(|ok| *ok);
        let roles = Roles::new(
            ScriptedBackend::new(),
            ScriptedRunner::new(),
            ScriptedVerifier::new(outcomes),
        );
        let outcome = tokio_test::block_on(roles.iterative().remediate(
            &report(),
            &context(),
            &TrialBudget::new(max),
            &ConversationTrace::new(),
        ))
        .unwrap();

        prop_assert!(outcome.attempts.len() <= max as usize);
        match first_success {
            Some(i) if i < max as usize => {
                prop_assert_eq!(outcome.verdict, StrategyVerdict::Recovered);
                prop_assert_eq!(outcome.attempts.len(), i + 1);
            }
            _ => {
                prop_assert_eq!(outcome.verdict, StrategyVerdict::ExhaustedBudget);
                prop_assert_eq!(outcome.attempts.len(), max as usize);
            }
        }
    }
}
