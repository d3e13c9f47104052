//! Scripted stand-ins for the remediation roles

use async_trait::async_trait;
use parking_lot::Mutex;
use remedy_agents::{
    ActionRunner, BackendError, BackendReply, ChatBackend, DiagnosticProbe, EnvironmentRestarter,
    ExecutionError, ProbeError, ToolCall, ToolSpec, Verdict, Verifier,
};
use remedy_chaos::{DeployError, EnvironmentDeployer};
use remedy_core::{
    ChatMessage, DiagnosisReport, EnvironmentHandle, HarnessError, RemediationAction,
    VerificationOutcome,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Callback fired by a fixture when it is used
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Minimal valid playbook
pub const PLAYBOOK: &str = "- hosts: k3s_master\n  tasks:\n    - name: scale\n      shell: kubectl scale deploy/ts-order-service --replicas=1\n";

/// `print_playbook` reply
#[must_use]
pub fn playbook_reply(code: &str) -> BackendReply {
    BackendReply::tool(ToolCall::new("print_playbook", json!({ "code": code })))
}

/// `probe_system` reply
#[must_use]
pub fn probe_reply(cmds: &str) -> BackendReply {
    BackendReply::tool(ToolCall::new("probe_system", json!({ "cmds": cmds })))
}

/// Backend replaying queued replies
///
/// Once the queue runs dry every call answers with [`PLAYBOOK`].
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<BackendReply, BackendError>>>,
    offered: Mutex<Vec<Vec<String>>>,
    transcripts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply
    #[must_use]
    pub fn then(self, reply: BackendReply) -> Self {
        self.replies.lock().push_back(Ok(reply));
        self
    }

    /// Queue an error
    #[must_use]
    pub fn then_fail(self, error: BackendError) -> Self {
        self.replies.lock().push_back(Err(error));
        self
    }

    /// Tool names offered on each call
    #[must_use]
    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered.lock().clone()
    }

    /// Conversation sent on each call
    #[must_use]
    pub fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.transcripts.lock().clone()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.offered.lock().len()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<BackendReply, BackendError> {
        self.offered
            .lock()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        self.transcripts.lock().push(messages.to_vec());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(playbook_reply(PLAYBOOK)))
    }
}

/// Runner replaying queued results, `Ok` once the queue is empty
#[derive(Default)]
pub struct ScriptedRunner {
    results: Mutex<VecDeque<Result<String, ExecutionError>>>,
    executed: Mutex<Vec<RemediationAction>>,
    on_execute: Option<Hook>,
}

impl ScriptedRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result
    #[must_use]
    pub fn then(self, result: Result<String, ExecutionError>) -> Self {
        self.results.lock().push_back(result);
        self
    }

    /// Fire `hook` on every successful execution
    #[must_use]
    pub fn on_execute(mut self, hook: Hook) -> Self {
        self.on_execute = Some(hook);
        self
    }

    /// Actions executed so far
    #[must_use]
    pub fn executed(&self) -> Vec<RemediationAction> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl ActionRunner for ScriptedRunner {
    async fn execute(&self, action: &RemediationAction) -> Result<String, ExecutionError> {
        self.executed.lock().push(action.clone());
        let result = self
            .results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("PLAY RECAP ok=1 changed=1 failed=0".to_string()));
        if result.is_ok() {
            if let Some(hook) = &self.on_execute {
                hook();
            }
        }
        result
    }
}

/// Verifier replaying queued outcomes, `Failure` once the queue is empty
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    outcomes: Mutex<VecDeque<VerificationOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedVerifier {
    #[must_use]
    pub fn new<I: IntoIterator<Item = VerificationOutcome>>(outcomes: I) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(&self, _report: &DiagnosisReport) -> Verdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().pop_front() {
            Some(VerificationOutcome::Success) => Verdict::success("scripted success"),
            _ => Verdict::failure("scripted failure"),
        }
    }
}

/// Probe that records commands and echoes them back
#[derive(Debug, Default)]
pub struct RecordingProbe {
    commands: Mutex<Vec<String>>,
}

impl RecordingProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl DiagnosticProbe for RecordingProbe {
    async fn run(&self, command: &str) -> Result<String, ProbeError> {
        self.commands.lock().push(command.to_string());
        Ok(format!("output of {command}"))
    }
}

/// Deployer that counts deployments
#[derive(Default)]
pub struct MockDeployer {
    deploys: AtomicUsize,
    fail_with: Mutex<Option<String>>,
    on_deploy: Option<Hook>,
}

impl MockDeployer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every deployment fail with `output`
    #[must_use]
    pub fn failing(self, output: &str) -> Self {
        *self.fail_with.lock() = Some(output.to_string());
        self
    }

    /// Fire `hook` on every successful deployment
    #[must_use]
    pub fn on_deploy(mut self, hook: Hook) -> Self {
        self.on_deploy = Some(hook);
        self
    }

    #[must_use]
    pub fn deploys(&self) -> usize {
        self.deploys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentDeployer for MockDeployer {
    async fn deploy(&self, env: &EnvironmentHandle) -> Result<(), DeployError> {
        self.deploys.fetch_add(1, Ordering::SeqCst);
        if let Some(output) = self.fail_with.lock().clone() {
            return Err(DeployError::Failed {
                script: format!("{}/deploy.sh", env.env_id),
                output,
            });
        }
        if let Some(hook) = &self.on_deploy {
            hook();
        }
        Ok(())
    }
}

/// Restarter that counts restarts
#[derive(Debug, Default)]
pub struct MockRestarter {
    restarts: AtomicUsize,
    fail: bool,
}

impl MockRestarter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every restart fail
    #[must_use]
    pub fn failing() -> Self {
        Self {
            restarts: AtomicUsize::new(0),
            fail: true,
        }
    }

    #[must_use]
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentRestarter for MockRestarter {
    async fn restart(&self) -> Result<(), HarnessError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(HarnessError::Infra("redeploy failed".into()))
        } else {
            Ok(())
        }
    }
}
