//! Trial orchestration
//!
//! One trial runs through a fixed sequence:
//!
//! 1. Prepare: redeploy when needed, wait until the environment is ready
//! 2. Snapshot the target's baseline
//! 3. Inject the fault and confirm its symptom
//! 4. Hand the diagnosis to the remediation strategy
//! 5. Revert and restore inside the cleanup scope
//! 6. Persist the trace and return the [`TrialResult`]
//!
//! Steps 1 to 3 never consume a remediation attempt. Whatever happens in
//! steps 1 to 4, including a timeout or a panic, step 5 runs.

use crate::cleanup::CleanupScope;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use remedy_agents::{
    EnvironmentRestarter, RemediationStrategy, StrategyOutcome, StrategyVerdict, TrialBudget,
};
use remedy_chaos::{
    BaselineGuard, CheckVerdict, ClusterApi, ClusterError, ClusterProbe, EnvironmentDeployer,
    FaultInjector, FaultTemplates, ProbeScope, RecoveryChecks,
};
use remedy_core::{
    AuxiliaryContext, ConversationTrace, DiagnosisReport, EnvironmentHandle, FailureSpec,
    HarnessConfig, HarnessError, HealthPolicy, InjectionRetryPolicy, TraceStore, TrialId,
    TrialOutcome, TrialResult,
};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Redeploys an environment and waits for it
pub struct ClusterRestarter {
    deployer: Arc<dyn EnvironmentDeployer>,
    probe: ClusterProbe,
    env: EnvironmentHandle,
    policy: HealthPolicy,
}

impl ClusterRestarter {
    #[must_use]
    pub fn new(
        deployer: Arc<dyn EnvironmentDeployer>,
        cluster: Arc<dyn ClusterApi>,
        env: EnvironmentHandle,
        policy: HealthPolicy,
    ) -> Self {
        Self {
            deployer,
            probe: ClusterProbe::new(cluster),
            env,
            policy,
        }
    }
}

#[async_trait]
impl EnvironmentRestarter for ClusterRestarter {
    async fn restart(&self) -> Result<(), HarnessError> {
        tracing::info!(env = %self.env.env_id, "redeploying environment");
        self.deployer.deploy(&self.env).await?;
        self.probe
            .wait_until_ready(&ProbeScope::environment(&self.env), &self.policy)
            .await?;
        Ok(())
    }
}

impl fmt::Debug for ClusterRestarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterRestarter")
            .field("env", &self.env.env_id)
            .finish_non_exhaustive()
    }
}

/// Outcome recorded for an error that ended a trial
#[must_use]
pub fn outcome_for(err: &HarnessError) -> TrialOutcome {
    match err {
        HarnessError::Setup(_) => TrialOutcome::SetupError {
            reason: err.to_string(),
        },
        HarnessError::Injection(_) => TrialOutcome::InjectionError {
            reason: err.to_string(),
        },
        HarnessError::Timeout { .. } => TrialOutcome::Timeout,
        HarnessError::Execution(_)
        | HarnessError::VerificationFailure
        | HarnessError::ExhaustedBudget { .. } => TrialOutcome::ExhaustedBudget,
        HarnessError::Infra(_)
        | HarnessError::Config(_)
        | HarnessError::Plan(_)
        | HarnessError::Trace(_) => TrialOutcome::InfraError {
            reason: err.to_string(),
        },
    }
}

fn cluster_failure(err: ClusterError) -> HarnessError {
    if err.is_unreachable() {
        HarnessError::Infra(err.to_string())
    } else {
        HarnessError::Injection(format!("symptom check failed: {err}"))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "remediation panicked".to_string())
}

/// Drives single trials against one environment
pub struct TrialOrchestrator {
    config: HarnessConfig,
    env: EnvironmentHandle,
    cluster: Arc<dyn ClusterApi>,
    probe: ClusterProbe,
    injector: Arc<FaultInjector>,
    baseline: Arc<BaselineGuard>,
    checks: RecoveryChecks,
    restarter: Arc<dyn EnvironmentRestarter>,
    strategy: Arc<dyn RemediationStrategy>,
    traces: TraceStore,
    context: AuxiliaryContext,
    needs_redeploy: AtomicBool,
}

impl TrialOrchestrator {
    /// Create an orchestrator with built-in fault templates
    #[must_use]
    pub fn new(
        config: HarnessConfig,
        env: EnvironmentHandle,
        cluster: Arc<dyn ClusterApi>,
        restarter: Arc<dyn EnvironmentRestarter>,
        strategy: Arc<dyn RemediationStrategy>,
    ) -> Self {
        let manifest = Some(config.manifest_path.clone()).filter(|p| p.exists());
        let baseline = BaselineGuard::new(Arc::clone(&cluster), config.health)
            .with_manifest_path(manifest);
        let context = AuxiliaryContext {
            runtime_description: config.runtime_description.clone(),
            ..AuxiliaryContext::default()
        };
        Self {
            probe: ClusterProbe::new(Arc::clone(&cluster)),
            injector: Arc::new(FaultInjector::new(Arc::clone(&cluster))),
            baseline: Arc::new(baseline),
            checks: RecoveryChecks::new(Arc::clone(&cluster)),
            traces: TraceStore::new(&config.save_path),
            cluster,
            restarter,
            strategy,
            context,
            env,
            config,
            needs_redeploy: AtomicBool::new(false),
        }
    }

    /// With fault templates
    #[must_use]
    pub fn with_templates(mut self, templates: FaultTemplates) -> Self {
        self.injector = Arc::new(
            FaultInjector::new(Arc::clone(&self.cluster)).with_templates(templates),
        );
        self
    }

    /// With the context handed to the strategy
    #[must_use]
    pub fn with_context(mut self, context: AuxiliaryContext) -> Self {
        self.context = context;
        self
    }

    /// Environment trials run against
    #[must_use]
    pub fn environment(&self) -> &EnvironmentHandle {
        &self.env
    }

    /// Strategy in use
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Run one trial to completion
    ///
    /// Every trial yields a [`TrialResult`], whatever its outcome. The only
    /// error is a trace that could not be written, which ends the run.
    pub async fn run_trial(&self, spec: &FailureSpec) -> Result<TrialResult, HarnessError> {
        let span = tracing::info_span!(
            "trial",
            experiment = %spec.experiment_id,
            category = %spec.category,
            target = %spec.target,
        );
        self.run_trial_inner(spec).instrument(span).await
    }

    async fn run_trial_inner(&self, spec: &FailureSpec) -> Result<TrialResult, HarnessError> {
        let trial_id = TrialId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        let trace = ConversationTrace::new();
        let mut scope = CleanupScope::new(Arc::clone(&self.injector), Arc::clone(&self.baseline));
        tracing::info!(trial = %trial_id, strategy = self.strategy.name(), "trial started");

        let mut remediation_time = Duration::ZERO;
        let outcome = match self.set_up(spec, &mut scope).await {
            Ok(report) => {
                let began = Instant::now();
                let outcome = self.remediate(&report, &trace).await;
                remediation_time = began.elapsed();
                outcome
            }
            Err(err) => {
                tracing::warn!(error = %err, "trial setup failed");
                outcome_for(&err)
            }
        };

        let cleanup = scope.close().await;
        if matches!(outcome, TrialOutcome::SetupError { .. }) {
            self.needs_redeploy.store(true, Ordering::SeqCst);
        }

        let trace_path = self.traces.path_for(spec, trial_id, started_at);
        let mut result = TrialResult {
            trial_id,
            spec: spec.clone(),
            attempts: trace.attempts(),
            outcome,
            started_at,
            duration: clock.elapsed(),
            remediation_time,
            trace_path: None,
            token_estimate: trace.token_estimate(),
            cleanup,
        };
        self.traces.persist(&trace_path, &result, &trace).await?;
        result.trace_path = Some(trace_path);

        tracing::info!(
            outcome = %result.outcome,
            attempts = result.iterations(),
            duration_secs = result.duration.as_secs_f64(),
            dirty = result.cleanup.environment_dirty,
            "trial finished"
        );
        Ok(result)
    }

    /// Steps 1 to 3, ending in the report handed to the strategy
    async fn set_up(
        &self,
        spec: &FailureSpec,
        scope: &mut CleanupScope,
    ) -> Result<DiagnosisReport, HarnessError> {
        self.prepare().await?;

        let snapshot = self.baseline.snapshot(&self.env, &spec.target).await?;
        scope.guard_snapshot(snapshot);

        let verdict = self.inject_confirmed(spec, scope).await?;
        let mut report = DiagnosisReport::for_spec(spec);
        report.symptom = format!("{} ({})", report.symptom, verdict.detail);
        Ok(report)
    }

    async fn prepare(&self) -> Result<(), HarnessError> {
        let redeploy =
            self.config.redeploy_each_trial || self.needs_redeploy.swap(false, Ordering::SeqCst);
        if redeploy {
            return self.restarter.restart().await;
        }
        let polls = self
            .probe
            .wait_until_ready(&ProbeScope::environment(&self.env), &self.config.health)
            .await?;
        tracing::debug!(polls, "environment ready");
        Ok(())
    }

    async fn inject_confirmed(
        &self,
        spec: &FailureSpec,
        scope: &mut CleanupScope,
    ) -> Result<CheckVerdict, HarnessError> {
        if let Some(verdict) = self.inject_once(spec, scope).await? {
            return Ok(verdict);
        }
        let not_observed = || {
            HarnessError::Injection(format!(
                "{} not observed on {} within {}s",
                spec.category.symptom(),
                spec.target,
                self.config.injection_timeout_secs
            ))
        };
        match self.config.injection_retry_policy() {
            InjectionRetryPolicy::Fail => Err(not_observed()),
            InjectionRetryPolicy::RestartOnce => {
                tracing::warn!("fault did not take hold, restarting environment and retrying once");
                scope.revert_now().await?;
                self.restarter.restart().await?;
                self.inject_once(spec, scope).await?.ok_or_else(not_observed)
            }
        }
    }

    async fn inject_once(
        &self,
        spec: &FailureSpec,
        scope: &mut CleanupScope,
    ) -> Result<Option<CheckVerdict>, HarnessError> {
        let record = self.injector.inject(spec).await?;
        scope.guard_injection(record);
        let verdict = self
            .checks
            .confirm_symptom(
                spec.category,
                &spec.target,
                self.config.injection_timeout(),
                self.config.wait_interval(),
            )
            .await
            .map_err(cluster_failure)?;
        if let Some(v) = &verdict {
            tracing::info!(detail = %v.detail, "fault confirmed");
        }
        Ok(verdict)
    }

    /// Step 4 under the trial timeout, panics contained
    async fn remediate(&self, report: &DiagnosisReport, trace: &ConversationTrace) -> TrialOutcome {
        let timeout = self.config.trial_timeout();
        let budget = TrialBudget::new(self.config.max_iterations())
            .with_deadline(Instant::now() + timeout)
            .with_strict_restart(self.config.enable_strict_restart);
        let run = AssertUnwindSafe(self.strategy.remediate(report, &self.context, &budget, trace))
            .catch_unwind();

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(Ok(StrategyOutcome { verdict, attempts }))) => {
                tracing::info!(verdict = ?verdict, attempts = attempts.len(), "strategy returned");
                match verdict {
                    StrategyVerdict::Recovered => TrialOutcome::Recovered,
                    StrategyVerdict::ExhaustedBudget => TrialOutcome::ExhaustedBudget,
                    StrategyVerdict::DeadlineExceeded => TrialOutcome::Timeout,
                }
            }
            Ok(Ok(Err(err))) => {
                tracing::error!(error = %err, "strategy failed");
                outcome_for(&err)
            }
            Ok(Err(payload)) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(reason = %reason, "strategy panicked");
                TrialOutcome::Aborted { reason }
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    attempts = trace.attempt_count(),
                    "trial timed out during remediation"
                );
                TrialOutcome::Timeout
            }
        }
    }
}

impl fmt::Debug for TrialOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrialOrchestrator")
            .field("env", &self.env.env_id)
            .field("strategy", &self.strategy.name())
            .field("active_faults", &self.injector.active_count())
            .finish_non_exhaustive()
    }
}
