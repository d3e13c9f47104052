//! Execution role
//!
//! Applies a remediation playbook to the live environment. This is the only
//! state-mutating step a strategy performs.

use crate::error::ExecutionError;
use async_trait::async_trait;
use remedy_core::RemediationAction;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Runs remediation actions
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Apply an action; `Ok` carries the runner's output
    async fn execute(&self, action: &RemediationAction) -> Result<String, ExecutionError>;
}

/// Drop a surrounding Markdown code fence, if any
#[must_use]
pub fn strip_code_fence(code: &str) -> &str {
    let trimmed = code.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Check that an action is a list of plays
pub fn validate_playbook(code: &str) -> Result<(), ExecutionError> {
    let code = strip_code_fence(code);
    if code.is_empty() {
        return Err(ExecutionError::Malformed("empty playbook".into()));
    }
    let doc: Value =
        serde_yaml::from_str(code).map_err(|e| ExecutionError::Malformed(e.to_string()))?;
    let plays = doc
        .as_sequence()
        .ok_or_else(|| ExecutionError::Malformed("a playbook is a list of plays".into()))?;
    if plays.is_empty() {
        return Err(ExecutionError::Malformed("playbook has no plays".into()));
    }
    if let Some(index) = plays.iter().position(|p| p.get("hosts").is_none()) {
        return Err(ExecutionError::Malformed(format!(
            "play {index} does not name its hosts"
        )));
    }
    Ok(())
}

/// Runs playbooks with `ansible-playbook -i <inventory> remediation.yml`
#[derive(Debug, Clone)]
pub struct AnsibleRunner {
    program: String,
    workdir: PathBuf,
    inventory: PathBuf,
    playbook_name: String,
    timeout: Duration,
}

impl AnsibleRunner {
    /// Runner working in `workdir` with the given inventory
    #[must_use]
    pub fn new(workdir: impl Into<PathBuf>, inventory: impl Into<PathBuf>) -> Self {
        Self {
            program: "ansible-playbook".to_string(),
            workdir: workdir.into(),
            inventory: inventory.into(),
            playbook_name: "remediation.yml".to_string(),
            timeout: Duration::from_secs(300),
        }
    }

    /// With a different runner binary
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// With a per-playbook timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Where the playbook is written
    #[must_use]
    pub fn playbook_path(&self) -> PathBuf {
        self.workdir.join(&self.playbook_name)
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }
}

#[async_trait]
impl ActionRunner for AnsibleRunner {
    async fn execute(&self, action: &RemediationAction) -> Result<String, ExecutionError> {
        validate_playbook(&action.code)?;
        let path = self.playbook_path();
        tokio::fs::write(&path, strip_code_fence(&action.code))
            .await
            .map_err(|source| ExecutionError::Write {
                path: path.display().to_string(),
                source,
            })?;
        tracing::info!(playbook = %path.display(), inventory = %self.inventory.display(), "executing playbook");

        let child = Command::new(&self.program)
            .arg("-i")
            .arg(&self.inventory)
            .arg(&self.playbook_name)
            .current_dir(self.workdir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Launch {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutionError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ExecutionError::Launch {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            tracing::info!("playbook executed");
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            tracing::warn!(exit_code, "playbook failed");
            Err(ExecutionError::Failed {
                exit_code,
                output: format!("STDOUT:\n{stdout}\n\nSTDERR:\n{}", stderr.trim()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYBOOK: &str = "- hosts: k3s_master\n  tasks:\n    - name: scale\n      command: kubectl scale deploy ts-order-service --replicas=2\n";

    #[test]
    fn strips_markdown_fences() {
        let fenced = format!("```yaml\n{PLAYBOOK}```");
        assert_eq!(strip_code_fence(&fenced), PLAYBOOK.trim());
        assert_eq!(strip_code_fence(PLAYBOOK), PLAYBOOK.trim());
    }

    #[test]
    fn rejects_non_playbooks() {
        assert!(validate_playbook(PLAYBOOK).is_ok());
        assert!(matches!(validate_playbook("  "), Err(ExecutionError::Malformed(_))));
        assert!(matches!(
            validate_playbook("hosts: all"),
            Err(ExecutionError::Malformed(_))
        ));
        assert!(matches!(
            validate_playbook("- tasks: []"),
            Err(ExecutionError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn reports_runner_failures_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = AnsibleRunner::new(dir.path(), "inventory.ini").with_program("false");
        let err = runner
            .execute(&RemediationAction::new(PLAYBOOK))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Failed { exit_code: 1, .. }));
        assert!(runner.playbook_path().exists());
    }

    #[tokio::test]
    async fn missing_runner_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner =
            AnsibleRunner::new(dir.path(), "inventory.ini").with_program("definitely-not-ansible");
        let err = runner
            .execute(&RemediationAction::new(PLAYBOOK))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Launch { .. }));
    }
}
