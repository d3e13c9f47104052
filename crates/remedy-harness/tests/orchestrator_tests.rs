use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use remedy_agents::{
    ClusterVerifier, EnvironmentRestarter, IterativeStrategy, RemediationStrategy,
    SingleShotStrategy, StrategyOutcome, TrialBudget, Verifier,
};
use remedy_chaos::{ClusterApi, FaultTemplates, RecoveryChecks};
use remedy_core::{
    AuxiliaryContext, ConversationTrace, DiagnosisReport, ExecutionStatus, FailureCategory,
    HarnessConfig, HarnessError, InjectionRetryPolicy, OutcomeKind, RemediationAttempt,
    RemediationMethod, TrialOutcome, VerificationOutcome,
};
use remedy_harness::{ClusterRestarter, TrialOrchestrator};
use remedy_test_utils::{
    cluster, default_resources, env, fast_health_policy, spec, spec_for, EnvHealth, Hook,
    MockCluster, MockDeployer, RecordingProbe, ScriptedBackend, ScriptedRunner, ScriptedVerifier,
    WORKLOAD,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Rig {
    cluster: Arc<MockCluster>,
    deployer: Arc<MockDeployer>,
    dir: TempDir,
}

impl Rig {
    fn new(cluster: MockCluster) -> Self {
        Self::with_deployer(cluster, MockDeployer::new())
    }

    fn with_deployer(cluster: MockCluster, deployer: MockDeployer) -> Self {
        Self {
            cluster: Arc::new(cluster),
            deployer: Arc::new(deployer),
            dir: TempDir::new().unwrap(),
        }
    }

    fn config(&self, method: RemediationMethod) -> HarnessConfig {
        let mut config = HarnessConfig::default().with_method(method);
        config.health = fast_health_policy();
        config.save_path = self.dir.path().to_path_buf();
        config.trial_timeout_secs = 600;
        config
    }

    fn api(&self) -> Arc<dyn ClusterApi> {
        Arc::clone(&self.cluster) as Arc<dyn ClusterApi>
    }

    fn orchestrator(
        &self,
        config: HarnessConfig,
        strategy: Arc<dyn RemediationStrategy>,
    ) -> TrialOrchestrator {
        let restarter = Arc::new(ClusterRestarter::new(
            Arc::clone(&self.deployer) as _,
            self.api(),
            env(),
            config.health,
        ));
        TrialOrchestrator::new(config, env(), self.api(), restarter, strategy)
    }

    fn single_shot(&self, verifier: Arc<dyn Verifier>) -> Arc<dyn RemediationStrategy> {
        Arc::new(SingleShotStrategy::new(
            Arc::new(ScriptedBackend::new()),
            Arc::new(ScriptedRunner::new()),
            verifier,
        ))
    }

    fn verifier(&self) -> Arc<dyn Verifier> {
        Arc::new(
            ClusterVerifier::new(RecoveryChecks::new(self.api()))
                .with_settle_delay(Duration::ZERO),
        )
    }

    /// The target's declared resources and chaos objects are back to baseline
    fn assert_baseline(&self, workload: &str) {
        assert_eq!(self.cluster.chaos_count(), 0, "{:?}", self.cluster.chaos_objects());
        let resources = self.cluster.resources_of(workload).unwrap();
        assert!(resources.iter().all(|c| c.resources == default_resources()));
    }

    fn calls_after(&self, marker: &str, prefix: &str) -> usize {
        let calls = self.cluster.calls();
        let Some(at) = calls.iter().position(|c| c.starts_with(marker)) else {
            return 0;
        };
        calls[at..].iter().filter(|c| c.starts_with(prefix)).count()
    }
}

/// Heals `workload` on the `nth` execution (1-based)
fn heal_on(cluster: &Arc<MockCluster>, workload: &'static str, nth: usize) -> Hook {
    let cluster = Arc::clone(cluster);
    let seen = Arc::new(AtomicUsize::new(0));
    Arc::new(move || {
        if seen.fetch_add(1, Ordering::SeqCst) + 1 == nth {
            cluster.heal(workload);
        }
    })
}

#[tokio::test(start_paused = true)]
async fn cpu_saturation_recovers_on_the_third_attempt() {
    let rig = Rig::new(cluster());
    let runner = Arc::new(ScriptedRunner::new().on_execute(heal_on(&rig.cluster, WORKLOAD, 3)));
    let backend = Arc::new(ScriptedBackend::new());
    let strategy = Arc::new(IterativeStrategy::new(
        Arc::clone(&backend) as _,
        Arc::new(RecordingProbe::new()),
        Arc::clone(&runner) as _,
        rig.verifier(),
    ));
    let orchestrator = rig.orchestrator(
        rig.config(RemediationMethod::ThinkRemed).with_max_iterations(3),
        strategy,
    );

    let result = orchestrator
        .run_trial(&spec(FailureCategory::CpuStress))
        .await
        .unwrap();

    assert_eq!(result.outcome, TrialOutcome::Recovered);
    assert_eq!(result.iterations(), 3);
    let verdicts: Vec<VerificationOutcome> =
        result.attempts.iter().map(|a| a.verification).collect();
    assert_eq!(
        verdicts,
        vec![
            VerificationOutcome::Failure,
            VerificationOutcome::Failure,
            VerificationOutcome::Success
        ]
    );
    assert_eq!(runner.executed().len(), 3);
    assert!(result.cleanup.is_clean());
    rig.assert_baseline(WORKLOAD);
}

#[tokio::test(start_paused = true)]
async fn failed_single_shot_on_a_config_fault_exhausts_the_budget_and_restores() {
    let rig = Rig::new(cluster().with_deployment("nacos-config", 1));
    let target = spec_for(FailureCategory::PodConfigError, "nacos-config");
    let before = rig.cluster.resources_of("nacos-config").unwrap();
    let verifier = Arc::new(ScriptedVerifier::new([VerificationOutcome::Failure]));
    let orchestrator = rig.orchestrator(
        rig.config(RemediationMethod::SoloGen),
        rig.single_shot(Arc::clone(&verifier) as _),
    );

    let result = orchestrator.run_trial(&target).await.unwrap();

    assert_eq!(result.outcome, TrialOutcome::ExhaustedBudget);
    assert_eq!(result.iterations(), 1);
    assert_eq!(verifier.calls(), 1);
    assert!(result.cleanup.restored);
    assert!(!result.cleanup.environment_dirty);
    assert_eq!(rig.cluster.resources_of("nacos-config").unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn fault_that_never_takes_hold_is_an_injection_error() {
    let rig = Rig::new(cluster());
    rig.cluster.set_fault_takes_hold(false);
    let backend = Arc::new(ScriptedBackend::new());
    let strategy = Arc::new(SingleShotStrategy::new(
        Arc::clone(&backend) as _,
        Arc::new(ScriptedRunner::new()),
        Arc::new(ScriptedVerifier::new([VerificationOutcome::Success])),
    ));
    let orchestrator = rig.orchestrator(rig.config(RemediationMethod::SoloGen), strategy);

    let result = orchestrator
        .run_trial(&spec(FailureCategory::CpuStress))
        .await
        .unwrap();

    assert_eq!(result.outcome.kind(), OutcomeKind::InjectionError);
    assert!(result.attempts.is_empty());
    assert_eq!(backend.calls(), 0);
    assert_eq!(rig.deployer.deploys(), 0);
    // revert, then the baseline restore re-reads the workload
    assert_eq!(rig.calls_after("apply StressChaos", "delete StressChaos"), 1);
    assert!(rig.calls_after("delete StressChaos", &format!("workload {WORKLOAD}")) >= 1);
    assert!(result.cleanup.is_clean());
    rig.assert_baseline(WORKLOAD);
}

#[tokio::test(start_paused = true)]
async fn restart_once_redeploys_and_injects_again() {
    let cluster = Arc::new(cluster());
    cluster.set_fault_takes_hold(false);
    let takes_hold: Hook = {
        let cluster = Arc::clone(&cluster);
        Arc::new(move || cluster.set_fault_takes_hold(true))
    };
    let rig = Rig {
        cluster,
        deployer: Arc::new(MockDeployer::new().on_deploy(takes_hold)),
        dir: TempDir::new().unwrap(),
    };
    let config = rig.config(RemediationMethod::SoloGen).with_strict_restart(true);
    assert_eq!(
        config.injection_retry_policy(),
        InjectionRetryPolicy::RestartOnce
    );
    let orchestrator = rig.orchestrator(
        config,
        rig.single_shot(Arc::new(ScriptedVerifier::new([VerificationOutcome::Success]))),
    );

    let result = orchestrator
        .run_trial(&spec(FailureCategory::CpuStress))
        .await
        .unwrap();

    assert_eq!(result.outcome, TrialOutcome::Recovered);
    assert_eq!(rig.deployer.deploys(), 1);
    assert_eq!(rig.cluster.calls_starting_with("apply StressChaos"), 2);
    assert_eq!(rig.cluster.calls_starting_with("delete StressChaos"), 2);
    rig.assert_baseline(WORKLOAD);
}

#[tokio::test(start_paused = true)]
async fn explicit_fail_policy_overrides_strict_restart() {
    let rig = Rig::new(cluster());
    rig.cluster.set_fault_takes_hold(false);
    let mut config = rig.config(RemediationMethod::SoloGen).with_strict_restart(true);
    config.injection_retry = Some(InjectionRetryPolicy::Fail);
    let orchestrator = rig.orchestrator(
        config,
        rig.single_shot(Arc::new(ScriptedVerifier::new([]))),
    );

    let result = orchestrator
        .run_trial(&spec(FailureCategory::MemoryStress))
        .await
        .unwrap();

    assert_eq!(result.outcome.kind(), OutcomeKind::InjectionError);
    assert_eq!(rig.deployer.deploys(), 0);
}

#[tokio::test(start_paused = true)]
async fn readiness_on_the_last_allowed_poll_proceeds() {
    let rig = Rig::new(cluster());
    rig.cluster
        .script_env(std::iter::repeat(EnvHealth::MetricsUnavailable).take(59));
    let orchestrator = rig.orchestrator(
        rig.config(RemediationMethod::SoloGen),
        rig.single_shot(Arc::new(ScriptedVerifier::new([VerificationOutcome::Success]))),
    );

    let result = orchestrator
        .run_trial(&spec(FailureCategory::CpuStress))
        .await
        .unwrap();

    assert_eq!(result.outcome, TrialOutcome::Recovered);
    assert_eq!(rig.cluster.calls_starting_with("list-pods *"), 60);
}

#[tokio::test(start_paused = true)]
async fn environment_never_ready_is_a_setup_error_and_redeploys_next_time() {
    let rig = Rig::new(cluster());
    rig.cluster
        .script_env(std::iter::repeat(EnvHealth::MetricsUnavailable).take(60));
    let backend = Arc::new(ScriptedBackend::new());
    let strategy = Arc::new(SingleShotStrategy::new(
        Arc::clone(&backend) as _,
        Arc::new(ScriptedRunner::new()),
        Arc::new(ScriptedVerifier::new([VerificationOutcome::Success])),
    ));
    let orchestrator = rig.orchestrator(rig.config(RemediationMethod::SoloGen), strategy);

    let failed = orchestrator
        .run_trial(&spec(FailureCategory::CpuStress))
        .await
        .unwrap();
    match &failed.outcome {
        TrialOutcome::SetupError { reason } => assert!(reason.contains("60 polls"), "{reason}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(failed.attempts.is_empty());
    assert_eq!(backend.calls(), 0);
    assert_eq!(rig.cluster.calls_starting_with("apply"), 0);
    assert!(failed.cleanup.is_clean());

    let next = orchestrator
        .run_trial(&spec(FailureCategory::CpuStress))
        .await
        .unwrap();
    assert_eq!(rig.deployer.deploys(), 1);
    assert_eq!(next.outcome, TrialOutcome::Recovered);
}

#[tokio::test(start_paused = true)]
async fn template_override_reaches_the_cluster() {
    const CUSTOM_CPU: &str = r"apiVersion: chaos-mesh.org/v1alpha1
kind: StressChaos
metadata:
  name: custom-[fault_name]
  namespace: [target_namespace]
spec:
  mode: all
  selector:
    namespaces:
      - [target_namespace]
    labelSelectors:
      app: [target_pod]
  stressors:
    cpu:
      workers: [magnitude]
      load: 100
  duration: [duration]
";
    let rig = Rig::new(cluster());
    let orchestrator = rig
        .orchestrator(
            rig.config(RemediationMethod::SoloGen),
            rig.single_shot(Arc::new(ScriptedVerifier::new([VerificationOutcome::Success]))),
        )
        .with_templates(
            FaultTemplates::builtin().with_override(FailureCategory::CpuStress, CUSTOM_CPU),
        );

    orchestrator
        .run_trial(&spec(FailureCategory::CpuStress))
        .await
        .unwrap();

    assert_eq!(rig.cluster.calls_starting_with("apply StressChaos/custom-"), 1);
    rig.assert_baseline(WORKLOAD);
}

#[tokio::test(start_paused = true)]
async fn failing_deployment_is_an_infrastructure_error() {
    let rig = Rig::with_deployer(
        cluster(),
        MockDeployer::new().failing("helm: connection refused"),
    );
    let mut config = rig.config(RemediationMethod::SoloGen);
    config.redeploy_each_trial = true;
    let orchestrator =
        rig.orchestrator(config, rig.single_shot(Arc::new(ScriptedVerifier::new([]))));

    let result = orchestrator
        .run_trial(&spec(FailureCategory::PodFail))
        .await
        .unwrap();

    assert!(result.outcome.is_run_fatal());
    assert!(result.attempts.is_empty());
    assert_eq!(rig.cluster.calls_starting_with("apply"), 0);
}

struct Panicking;

#[async_trait]
impl RemediationStrategy for Panicking {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn remediate(
        &self,
        _report: &DiagnosisReport,
        _context: &AuxiliaryContext,
        _budget: &TrialBudget,
        _trace: &ConversationTrace,
    ) -> Result<StrategyOutcome, HarnessError> {
        panic!("coordinator lost its mind")
    }
}

/// Records one failed attempt, then never returns
struct Hanging;

#[async_trait]
impl RemediationStrategy for Hanging {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn remediate(
        &self,
        _report: &DiagnosisReport,
        _context: &AuxiliaryContext,
        _budget: &TrialBudget,
        trace: &ConversationTrace,
    ) -> Result<StrategyOutcome, HarnessError> {
        trace.record_attempt(RemediationAttempt {
            iteration: 0,
            action: None,
            execution: ExecutionStatus::NotProduced,
            execution_output: "still thinking".into(),
            verification: VerificationOutcome::Failure,
            probe_rounds: 0,
            started_at: Utc::now(),
        });
        tokio::time::sleep(Duration::from_secs(86_400)).await;
        unreachable!("the trial timeout fires first")
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_strategy_is_aborted_and_cleaned_up() {
    let rig = Rig::new(cluster());
    let orchestrator =
        rig.orchestrator(rig.config(RemediationMethod::ThinkRemed), Arc::new(Panicking));

    let result = orchestrator
        .run_trial(&spec(FailureCategory::PodConfigError))
        .await
        .unwrap();

    assert_eq!(
        result.outcome,
        TrialOutcome::Aborted {
            reason: "coordinator lost its mind".into()
        }
    );
    assert!(result.cleanup.is_clean());
    rig.assert_baseline(WORKLOAD);
}

#[tokio::test(start_paused = true)]
async fn trial_timeout_keeps_recorded_attempts_and_cleans_up() {
    let rig = Rig::new(cluster());
    let mut config = rig.config(RemediationMethod::ThinkRemed);
    config.trial_timeout_secs = 60;
    let orchestrator = rig.orchestrator(config, Arc::new(Hanging));

    let result = orchestrator
        .run_trial(&spec(FailureCategory::NetworkLoss))
        .await
        .unwrap();

    assert_eq!(result.outcome, TrialOutcome::Timeout);
    assert_eq!(result.iterations(), 1);
    assert!(result.remediation_time >= Duration::from_secs(60));
    assert!(result.cleanup.is_clean());
    rig.assert_baseline(WORKLOAD);
}

#[tokio::test(start_paused = true)]
async fn every_outcome_leaves_the_baseline_intact() {
    fn dyn_strategy(s: impl RemediationStrategy + 'static) -> Arc<dyn RemediationStrategy> {
        Arc::new(s)
    }

    let cases = [
        (FailureCategory::CpuStress, dyn_strategy(Panicking), OutcomeKind::Aborted, true),
        (FailureCategory::PodConfigError, dyn_strategy(Hanging), OutcomeKind::Timeout, true),
        (
            FailureCategory::MemoryStress,
            dyn_strategy(Panicking),
            OutcomeKind::InjectionError,
            false,
        ),
        (FailureCategory::DiskIo, dyn_strategy(Hanging), OutcomeKind::Timeout, true),
    ];
    for (category, strategy, expected, takes_hold) in cases {
        let rig = Rig::new(cluster());
        rig.cluster.set_fault_takes_hold(takes_hold);
        let mut config = rig.config(RemediationMethod::ThinkRemed);
        config.trial_timeout_secs = 30;
        let result = rig
            .orchestrator(config, strategy)
            .run_trial(&spec(category))
            .await
            .unwrap();

        assert_eq!(result.outcome.kind(), expected, "{category}");
        assert!(result.cleanup.is_clean(), "{category}: {:?}", result.cleanup);
        if !result.outcome.strategy_ran() {
            assert!(result.attempts.is_empty(), "{category}");
        }
        rig.assert_baseline(WORKLOAD);
    }
}

#[tokio::test(start_paused = true)]
async fn unreachable_cluster_during_cleanup_marks_the_environment_dirty() {
    struct CutsTheCable(Arc<MockCluster>);

    #[async_trait]
    impl RemediationStrategy for CutsTheCable {
        fn name(&self) -> &'static str {
            "cuts-the-cable"
        }

        async fn remediate(
            &self,
            _report: &DiagnosisReport,
            _context: &AuxiliaryContext,
            _budget: &TrialBudget,
            _trace: &ConversationTrace,
        ) -> Result<StrategyOutcome, HarnessError> {
            self.0.set_unreachable(true);
            Ok(StrategyOutcome {
                verdict: remedy_agents::StrategyVerdict::ExhaustedBudget,
                attempts: Vec::new(),
            })
        }
    }

    let rig = Rig::new(cluster());
    let orchestrator = rig.orchestrator(
        rig.config(RemediationMethod::ThinkRemed),
        Arc::new(CutsTheCable(Arc::clone(&rig.cluster))),
    );

    let result = orchestrator
        .run_trial(&spec(FailureCategory::CpuStress))
        .await
        .unwrap();

    assert_eq!(result.outcome, TrialOutcome::ExhaustedBudget);
    assert!(result.cleanup.environment_dirty);
    assert!(!result.cleanup.reverted);
    assert!(!result.cleanup.restored);
    assert_eq!(result.cleanup.errors.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn every_trial_writes_its_trace() {
    let rig = Rig::new(cluster());
    rig.cluster.set_fault_takes_hold(false);
    let orchestrator = rig.orchestrator(
        rig.config(RemediationMethod::SoloGen),
        rig.single_shot(Arc::new(ScriptedVerifier::new([]))),
    );

    let result = orchestrator
        .run_trial(&spec(FailureCategory::NetworkDelay))
        .await
        .unwrap();

    let path = result.trace_path.clone().unwrap();
    assert!(path.starts_with(rig.dir.path()));
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("ts-order-service_network-delay_"), "{name}");

    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(doc["metadata"]["final_status"], "failed");
    assert_eq!(doc["metadata"]["category"], "network-delay");
    assert_eq!(doc["metadata"]["retries"], 0);
    assert!(doc["metadata"]["outcome"]
        .as_str()
        .unwrap()
        .starts_with("injection-error"));
    assert_eq!(doc["attempts"].as_array().unwrap().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn unwritable_save_path_is_run_fatal() {
    let rig = Rig::new(cluster());
    let blocker = rig.dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();
    let mut config = rig.config(RemediationMethod::SoloGen);
    config.save_path = blocker.join("traces");
    let orchestrator = rig.orchestrator(
        config,
        rig.single_shot(Arc::new(ScriptedVerifier::new([VerificationOutcome::Success]))),
    );

    let err = orchestrator
        .run_trial(&spec(FailureCategory::CpuStress))
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Trace(_)));
    assert!(err.is_run_fatal());
    rig.assert_baseline(WORKLOAD);
}

#[tokio::test]
async fn restarter_deploys_then_waits_for_readiness() {
    let cluster = Arc::new(cluster());
    cluster.script_env([EnvHealth::NotScheduled, EnvHealth::PartiallyReady]);
    let deployer = Arc::new(MockDeployer::new());
    let restarter = ClusterRestarter::new(
        Arc::clone(&deployer) as _,
        Arc::clone(&cluster) as _,
        env(),
        fast_health_policy(),
    );

    restarter.restart().await.unwrap();

    assert_eq!(deployer.deploys(), 1);
    assert_eq!(cluster.calls_starting_with("list-pods *"), 3);
}
