//! Iterative multi-role remediation
//!
//! The coordinator, probe, execution and verification roles are driven by a
//! single loop over [`Phase`]. Each role is a plain call from the loop; no
//! role runs concurrently with another.
//!
//! ```text
//! Start -> Coordinate -> (Probe -> Coordinate)* -> Execute -> Verify -> Done
//!              ^                                      |          |
//!              +------------------ Reflect <----------+----------+
//! ```
//!
//! Each pass through `Reflect` consumes one iteration of the budget.

use super::{
    system_prompt, EnvironmentRestarter, RemediationStrategy, StrategyOutcome, StrategyVerdict,
    TrialBudget,
};
use crate::backend::ChatBackend;
use crate::probe::{probe_all, DiagnosticProbe};
use crate::runner::ActionRunner;
use crate::tools::{ToolRequest, ToolSpec, PRINT_PLAYBOOK};
use crate::verify::Verifier;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remedy_core::{
    AuxiliaryContext, ChatMessage, ChatRole, ConversationTrace, DiagnosisReport,
    ExecutionStatus, HarnessError, RemediationAction, RemediationAttempt, VerificationOutcome,
};
use std::fmt;
use std::sync::Arc;

const CONTINUE_PROMPT: &str = "Please continue to generate executable Ansible playbook or get more information from the probe agent.";

/// Loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Start,
    /// Coordinator decides: probe more or propose an action
    Coordinate,
    /// Read-only diagnostics requested by the coordinator
    Probe,
    /// Apply the proposed action
    Execute,
    /// Check whether the environment recovered
    Verify,
    /// Close the iteration and feed the failure back
    Reflect,
    Done,
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: Phase) -> &'static [Phase] {
    use Phase::{Coordinate, Done, Execute, Probe, Reflect, Start, Verify};
    match from {
        Start => &[Coordinate, Done],
        Coordinate => &[Probe, Execute, Reflect, Done],
        Probe => &[Coordinate],
        Execute => &[Verify, Reflect],
        Verify => &[Done, Reflect],
        Reflect => &[Coordinate, Done],
        Done => &[],
    }
}

fn advance(phase: &mut Phase, next: Phase) {
    debug_assert!(
        allowed_transitions(*phase).contains(&next),
        "illegal phase transition {phase:?} -> {next:?}"
    );
    tracing::trace!(from = ?phase, to = ?next, "phase transition");
    *phase = next;
}

/// Working state of one iteration
struct Iteration {
    index: u32,
    started_at: DateTime<Utc>,
    probe_rounds: u32,
    pending_probes: Vec<String>,
    action: Option<RemediationAction>,
    execution: ExecutionStatus,
    execution_output: String,
    recorded: bool,
}

impl Iteration {
    fn new(index: u32) -> Self {
        Self {
            index,
            started_at: Utc::now(),
            probe_rounds: 0,
            pending_probes: Vec::new(),
            action: None,
            execution: ExecutionStatus::NotProduced,
            execution_output: String::new(),
            recorded: false,
        }
    }

    fn not_produced(&mut self, reason: impl Into<String>) {
        self.action = None;
        self.execution = ExecutionStatus::NotProduced;
        self.execution_output = reason.into();
    }

    fn record(
        &mut self,
        verification: VerificationOutcome,
        trace: &ConversationTrace,
    ) -> RemediationAttempt {
        self.recorded = true;
        let attempt = RemediationAttempt {
            iteration: self.index,
            action: self.action.clone(),
            execution: self.execution,
            execution_output: self.execution_output.clone(),
            verification,
            probe_rounds: self.probe_rounds,
            started_at: self.started_at,
        };
        trace.record_attempt(attempt.clone());
        attempt
    }
}

/// Coordinator / probe / execution / verification loop
pub struct IterativeStrategy {
    backend: Arc<dyn ChatBackend>,
    probe: Arc<dyn DiagnosticProbe>,
    runner: Arc<dyn ActionRunner>,
    verifier: Arc<dyn Verifier>,
    restarter: Option<Arc<dyn EnvironmentRestarter>>,
    max_probe_rounds: u32,
}

impl IterativeStrategy {
    /// Create the strategy from its roles
    #[must_use]
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        probe: Arc<dyn DiagnosticProbe>,
        runner: Arc<dyn ActionRunner>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            backend,
            probe,
            runner,
            verifier,
            restarter: None,
            max_probe_rounds: 5,
        }
    }

    /// With the restarter used in strict-restart mode
    #[must_use]
    pub fn with_restarter(mut self, restarter: Arc<dyn EnvironmentRestarter>) -> Self {
        self.restarter = Some(restarter);
        self
    }

    /// With the probe rounds allowed per iteration
    #[must_use]
    pub fn with_max_probe_rounds(mut self, rounds: u32) -> Self {
        self.max_probe_rounds = rounds;
        self
    }

    /// Ask the coordinator for the next step
    async fn coordinate(&self, iteration: &mut Iteration, trace: &ConversationTrace) -> Phase {
        let mut tools = vec![ToolSpec::print_playbook()];
        let may_probe = iteration.probe_rounds < self.max_probe_rounds;
        if may_probe {
            tools.push(ToolSpec::probe_system());
        }

        let reply = match self.backend.chat(&trace.messages(), &tools).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(iteration = iteration.index, error = %e, "coordinator unavailable");
                iteration.not_produced(format!("backend error: {e}"));
                return Phase::Reflect;
            }
        };
        let requests: Vec<(String, ToolRequest)> = reply
            .tool_calls
            .iter()
            .map(|call| (call.arguments_text(), ToolRequest::from_call(call)))
            .collect();

        match requests.first() {
            None => {
                iteration.not_produced("the model produced no tool call");
                Phase::Reflect
            }
            Some((raw, ToolRequest::PrintPlaybook { code })) => {
                trace.push(ChatMessage::assistant(raw.clone()));
                iteration.action = Some(RemediationAction::new(code.clone()));
                Phase::Execute
            }
            Some((raw, ToolRequest::Malformed { tool, reason })) if tool == PRINT_PLAYBOOK => {
                trace.push(ChatMessage::assistant(raw.clone()));
                iteration.not_produced(format!("malformed playbook call: {reason}"));
                Phase::Reflect
            }
            Some(_) if !may_probe => {
                iteration.not_produced("probe rounds exhausted without a playbook");
                Phase::Reflect
            }
            Some(_) => {
                iteration.pending_probes = requests
                    .iter()
                    .filter_map(|(_, request)| match request {
                        ToolRequest::ProbeSystem { commands } => Some(commands.iter().cloned()),
                        _ => None,
                    })
                    .flatten()
                    .collect();
                Phase::Probe
            }
        }
    }

    async fn run_probes(&self, iteration: &mut Iteration, trace: &ConversationTrace) {
        let commands = std::mem::take(&mut iteration.pending_probes);
        iteration.probe_rounds += 1;
        tracing::info!(
            iteration = iteration.index,
            round = iteration.probe_rounds,
            commands = commands.len(),
            "probing environment"
        );
        let transcript = if commands.is_empty() {
            "no runnable probe command was given".to_string()
        } else {
            probe_all(self.probe.as_ref(), &commands).await
        };
        trace.push(ChatMessage::new(ChatRole::Tool, transcript));
        trace.push(ChatMessage::user(CONTINUE_PROMPT));
    }

    async fn execute(
        &self,
        iteration: &mut Iteration,
        budget: &TrialBudget,
        trace: &ConversationTrace,
    ) -> Result<Phase, HarnessError> {
        let Some(action) = iteration.action.clone() else {
            iteration.not_produced("no action to execute");
            return Ok(Phase::Reflect);
        };
        match self.runner.execute(&action).await {
            Ok(output) => {
                iteration.execution = ExecutionStatus::Succeeded;
                iteration.execution_output = output;
                trace.push(ChatMessage::assistant(format!(
                    "playbook execution response: {}",
                    iteration.execution_output
                )));
                Ok(Phase::Verify)
            }
            Err(e) => {
                tracing::warn!(iteration = iteration.index, error = %e, "remediation action failed");
                iteration.execution = ExecutionStatus::Failed;
                iteration.execution_output = e.feedback();
                trace.push(ChatMessage::assistant(format!(
                    "playbook execution response: {}",
                    iteration.execution_output
                )));
                if budget.strict_restart {
                    match &self.restarter {
                        Some(restarter) => {
                            tracing::info!("strict restart: redeploying environment");
                            restarter.restart().await?;
                        }
                        None => tracing::warn!("strict restart requested without a restarter"),
                    }
                }
                Ok(Phase::Reflect)
            }
        }
    }
}

#[async_trait]
impl RemediationStrategy for IterativeStrategy {
    fn name(&self) -> &'static str {
        "iterative"
    }

    async fn remediate(
        &self,
        report: &DiagnosisReport,
        context: &AuxiliaryContext,
        budget: &TrialBudget,
        trace: &ConversationTrace,
    ) -> Result<StrategyOutcome, HarnessError> {
        let mut phase = Phase::Start;
        let mut iteration = Iteration::new(0);
        let mut attempts = Vec::new();
        let mut verdict = StrategyVerdict::ExhaustedBudget;

        while phase != Phase::Done {
            let next = match phase {
                Phase::Start => {
                    trace.push(ChatMessage::system(system_prompt(report, context, true)));
                    if budget.max_iterations == 0 {
                        Phase::Done
                    } else if budget.expired() {
                        verdict = StrategyVerdict::DeadlineExceeded;
                        Phase::Done
                    } else {
                        Phase::Coordinate
                    }
                }
                Phase::Coordinate => {
                    if budget.expired() {
                        verdict = StrategyVerdict::DeadlineExceeded;
                        Phase::Done
                    } else {
                        self.coordinate(&mut iteration, trace).await
                    }
                }
                Phase::Probe => {
                    self.run_probes(&mut iteration, trace).await;
                    Phase::Coordinate
                }
                Phase::Execute => self.execute(&mut iteration, budget, trace).await?,
                Phase::Verify => {
                    let checked = self.verifier.verify(report).await;
                    tracing::info!(
                        iteration = iteration.index,
                        outcome = ?checked.outcome,
                        detail = %checked.detail,
                        "attempt verified"
                    );
                    attempts.push(iteration.record(checked.outcome, trace));
                    if checked.outcome.is_success() {
                        verdict = StrategyVerdict::Recovered;
                        Phase::Done
                    } else {
                        iteration.execution_output = format!(
                            "{}\nverification: {}",
                            iteration.execution_output, checked.detail
                        );
                        Phase::Reflect
                    }
                }
                Phase::Reflect => {
                    if !iteration.recorded {
                        attempts.push(iteration.record(VerificationOutcome::Failure, trace));
                    }
                    let used = iteration.index + 1;
                    if used >= budget.max_iterations {
                        tracing::info!(attempts = used, "remediation budget exhausted");
                        Phase::Done
                    } else if budget.expired() {
                        verdict = StrategyVerdict::DeadlineExceeded;
                        Phase::Done
                    } else {
                        trace.push(ChatMessage::user(format!(
                            "The failure of online service has not yet been remediated.\n\
                             You may use the probe agent to further inspect the system state and generate a new Ansible playbook to attempt remediation again.\n\
                             The previous playbook execution returned: {}, output: {}",
                            iteration.execution == ExecutionStatus::Succeeded,
                            iteration.execution_output
                        )));
                        iteration = Iteration::new(used);
                        Phase::Coordinate
                    }
                }
                Phase::Done => Phase::Done,
            };
            advance(&mut phase, next);
        }

        Ok(StrategyOutcome { verdict, attempts })
    }
}

impl fmt::Debug for IterativeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterativeStrategy")
            .field("max_probe_rounds", &self.max_probe_rounds)
            .field("strict_restart_capable", &self.restarter.is_some())
            .finish_non_exhaustive()
    }
}
