//! Environment deployment
//!
//! Deploying a sample system is delegated to the environment's own script
//! (`<envs_root>/<env>/deploy.sh`), which tears down any prior instance first.

use crate::error::DeployError;
use async_trait::async_trait;
use remedy_core::EnvironmentHandle;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Brings an environment up
#[async_trait]
pub trait EnvironmentDeployer: Send + Sync {
    /// Deploy, replacing any prior instance
    async fn deploy(&self, env: &EnvironmentHandle) -> Result<(), DeployError>;
}

/// Runs the environment's deploy script with `bash`
#[derive(Debug, Clone)]
pub struct ScriptDeployer {
    envs_root: PathBuf,
    script_name: String,
    timeout: Duration,
}

impl ScriptDeployer {
    /// Deployer rooted at the directory holding one folder per environment
    #[must_use]
    pub fn new(envs_root: impl Into<PathBuf>) -> Self {
        Self {
            envs_root: envs_root.into(),
            script_name: "deploy.sh".to_string(),
            timeout: Duration::from_secs(1800),
        }
    }

    /// With a script name other than `deploy.sh`
    #[must_use]
    pub fn with_script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    /// With a deployment timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Script path for an environment
    #[must_use]
    pub fn script_for(&self, env: &EnvironmentHandle) -> PathBuf {
        self.envs_root.join(&env.env_id).join(&self.script_name)
    }
}

#[async_trait]
impl EnvironmentDeployer for ScriptDeployer {
    async fn deploy(&self, env: &EnvironmentHandle) -> Result<(), DeployError> {
        let script = self.script_for(env);
        let script_display = script.display().to_string();
        if !script.exists() {
            return Err(DeployError::Launch {
                script: script_display,
                reason: "no such file".into(),
            });
        }
        tracing::info!(env = %env.env_id, namespace = %env.namespace, script = %script_display, "deploying environment");

        let mut command = Command::new("bash");
        command
            .arg(&script)
            .env("NAMESPACE", &env.namespace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = script.parent() {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| DeployError::Launch {
            script: script_display.clone(),
            reason: e.to_string(),
        })?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| DeployError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| DeployError::Launch {
                script: script_display.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(20)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(DeployError::Failed {
                script: script_display,
                output: tail,
            });
        }
        tracing::info!(env = %env.env_id, "environment deployed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(id: &str) -> EnvironmentHandle {
        EnvironmentHandle::new(id, "default")
    }

    #[test]
    fn script_path_is_per_environment() {
        let deployer = ScriptDeployer::new("/opt/envs");
        assert_eq!(
            deployer.script_for(&env("train-ticket")),
            PathBuf::from("/opt/envs/train-ticket/deploy.sh")
        );
    }

    #[tokio::test]
    async fn missing_script_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScriptDeployer::new(dir.path())
            .deploy(&env("simple-micro"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Launch { .. }));
    }

    #[tokio::test]
    async fn failing_script_reports_its_output() {
        let dir = tempfile::tempdir().unwrap();
        let env_dir = dir.path().join("simple-micro");
        std::fs::create_dir(&env_dir).unwrap();
        std::fs::write(env_dir.join("deploy.sh"), "echo boom >&2\nexit 3\n").unwrap();

        let err = ScriptDeployer::new(dir.path())
            .deploy(&env("simple-micro"))
            .await
            .unwrap_err();
        match err {
            DeployError::Failed { output, .. } => assert_eq!(output, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
