use super::{
    system_prompt, RemediationStrategy, StrategyOutcome, StrategyVerdict, TrialBudget,
};
use crate::backend::ChatBackend;
use crate::runner::ActionRunner;
use crate::tools::{ToolRequest, ToolSpec};
use crate::verify::Verifier;
use async_trait::async_trait;
use chrono::Utc;
use remedy_core::{
    AuxiliaryContext, ChatMessage, ConversationTrace, DiagnosisReport, ExecutionStatus,
    HarnessError, RemediationAction, RemediationAttempt,
};
use std::fmt;
use std::sync::Arc;

/// One generation, one execution, one verification
pub struct SingleShotStrategy {
    backend: Arc<dyn ChatBackend>,
    runner: Arc<dyn ActionRunner>,
    verifier: Arc<dyn Verifier>,
}

impl SingleShotStrategy {
    /// Create the strategy from its roles
    #[must_use]
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        runner: Arc<dyn ActionRunner>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            backend,
            runner,
            verifier,
        }
    }

    async fn generate(&self, trace: &ConversationTrace) -> Result<RemediationAction, String> {
        let reply = self
            .backend
            .chat(&trace.messages(), &[ToolSpec::print_playbook()])
            .await
            .map_err(|e| format!("backend error: {e}"))?;
        let call = reply
            .tool_calls
            .first()
            .ok_or_else(|| "the model produced no playbook".to_string())?;
        trace.push(ChatMessage::assistant(call.arguments_text()));
        match ToolRequest::from_call(call) {
            ToolRequest::PrintPlaybook { code } => Ok(RemediationAction::new(code)),
            ToolRequest::ProbeSystem { .. } => Err("probing is not available".to_string()),
            ToolRequest::Malformed { reason, .. } => {
                Err(format!("malformed playbook call: {reason}"))
            }
        }
    }
}

#[async_trait]
impl RemediationStrategy for SingleShotStrategy {
    fn name(&self) -> &'static str {
        "single-shot"
    }

    async fn remediate(
        &self,
        report: &DiagnosisReport,
        context: &AuxiliaryContext,
        budget: &TrialBudget,
        trace: &ConversationTrace,
    ) -> Result<StrategyOutcome, HarnessError> {
        if budget.max_iterations == 0 || budget.expired() {
            return Ok(StrategyOutcome {
                verdict: if budget.expired() {
                    StrategyVerdict::DeadlineExceeded
                } else {
                    StrategyVerdict::ExhaustedBudget
                },
                attempts: Vec::new(),
            });
        }
        let started_at = Utc::now();
        trace.push(ChatMessage::system(system_prompt(report, context, false)));

        let (action, execution, execution_output) = match self.generate(trace).await {
            Ok(action) => match self.runner.execute(&action).await {
                Ok(output) => (Some(action), ExecutionStatus::Succeeded, output),
                Err(e) => (Some(action), ExecutionStatus::Failed, e.feedback()),
            },
            Err(reason) => {
                tracing::warn!(reason = %reason, "no playbook generated");
                (None, ExecutionStatus::NotProduced, reason)
            }
        };
        trace.push(ChatMessage::assistant(format!(
            "playbook execution response: {execution_output}"
        )));

        let verdict = self.verifier.verify(report).await;
        tracing::info!(outcome = ?verdict.outcome, detail = %verdict.detail, "single-shot verified");
        let attempt = RemediationAttempt {
            iteration: 0,
            action,
            execution,
            execution_output,
            verification: verdict.outcome,
            probe_rounds: 0,
            started_at,
        };
        trace.record_attempt(attempt.clone());

        Ok(StrategyOutcome {
            verdict: if verdict.outcome.is_success() {
                StrategyVerdict::Recovered
            } else {
                StrategyVerdict::ExhaustedBudget
            },
            attempts: vec![attempt],
        })
    }
}

impl fmt::Debug for SingleShotStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleShotStrategy").finish_non_exhaustive()
    }
}
