//! Probe role
//!
//! Runs the coordinator's diagnostic commands. Commands that could mutate
//! the environment are refused before they reach a shell, and the refusal is
//! reported back like any other result.

use crate::error::ProbeError;
use async_trait::async_trait;
use regex::Regex;
use std::fmt::Write as _;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;

/// Runs one read-only diagnostic command
#[async_trait]
pub trait DiagnosticProbe: Send + Sync {
    /// Run `command` and return what it printed
    async fn run(&self, command: &str) -> Result<String, ProbeError>;
}

/// Run every command in order and format the transcript fed back to the coordinator
pub async fn probe_all(probe: &dyn DiagnosticProbe, commands: &[String]) -> String {
    let mut transcript = String::new();
    for command in commands {
        let response = match probe.run(command).await {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(command, error = %e, "probe command not run");
                e.to_string()
            }
        };
        let _ = writeln!(transcript, "command: {command}\nresponse: {response}");
    }
    transcript
}

struct Rule {
    pattern: Regex,
    reason: &'static str,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (
                r"\bkubectl\b.*\b(apply|create|delete|patch|edit|scale|replace|set|label|annotate|cordon|uncordon|drain|taint|expose|autoscale)\b",
                "mutating kubectl verb",
            ),
            (r"\bkubectl\b.*\brollout\s+(restart|undo|pause|resume)\b", "rollout change"),
            (r"\bhelm\s+(install|upgrade|uninstall|delete|rollback)\b", "helm release change"),
            (r"\bansible(-playbook)?\b", "runs automation"),
            (
                r#"(^|[;&|'"`(]\s*|\s)(rm|rmdir|mv|dd|mkfs\S*|chmod|chown|truncate|shred)(\s|$)"#,
                "file mutation",
            ),
            (r"\b(kill|killall|pkill|reboot|shutdown|halt|poweroff)\b", "process or host control"),
            (
                r"\bsystemctl\s+(start|stop|restart|reload|enable|disable|kill|mask)\b",
                "service control",
            ),
            (r"\bsed\s+(-\w*i|--in-place)", "in-place edit"),
            (r"\btee\b", "writes files"),
            (r"\$\(|`", "command substitution"),
            (r"\b(sh|bash|zsh|dash|ksh|busybox\s+sh)\s+(-\w+\s+)*-\w*c\b", "nested shell"),
            (r"\|\s*(sh|bash|zsh|dash|ksh)\b", "pipes into a shell"),
            (r"\beval\s", "indirect execution"),
        ]
        .into_iter()
        .filter_map(|(pattern, reason)| {
            Regex::new(pattern).ok().map(|pattern| Rule { pattern, reason })
        })
        .collect()
    })
}

fn kubectl_exec() -> Option<&'static Regex> {
    static EXEC: OnceLock<Option<Regex>> = OnceLock::new();
    EXEC
        .get_or_init(|| Regex::new(r"\bkubectl\b.*\bexec\b").ok())
        .as_ref()
}

fn interactive_flag() -> Option<&'static Regex> {
    static INTERACTIVE: OnceLock<Option<Regex>> = OnceLock::new();
    INTERACTIVE
        .get_or_init(|| Regex::new(r"(^|\s)(-\w*[it]\w*|--stdin|--tty)(\s|=|$)").ok())
        .as_ref()
}

fn redirection() -> Option<&'static Regex> {
    static REDIRECT: OnceLock<Option<Regex>> = OnceLock::new();
    REDIRECT
        .get_or_init(|| Regex::new(r"\d?>>?\s*(&?[^\s;&|]+)").ok())
        .as_ref()
}

/// Refuses commands that could mutate the environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyGuard;

impl ReadOnlyGuard {
    /// Accept or reject a command
    ///
    /// A `kubectl exec` is accepted only in its `-- <command>` form, without
    /// a terminal, and only when the in-pod command passes the same checks.
    pub fn check(self, command: &str) -> Result<(), ProbeError> {
        let reject = |reason: &str| ProbeError::Rejected {
            command: command.to_string(),
            reason: reason.to_string(),
        };
        if let Some(exec) = kubectl_exec().and_then(|re| re.find(command)) {
            let rest = &command[exec.start()..];
            let Some((flags, payload)) = rest.split_once(" -- ") else {
                return Err(reject("kubectl exec without an explicit `--` command"));
            };
            if interactive_flag().is_some_and(|re| re.is_match(flags)) {
                return Err(reject("interactive kubectl exec"));
            }
            self.check(payload).map_err(|e| match e {
                ProbeError::Rejected { reason, .. } => {
                    reject(&format!("in-pod command: {reason}"))
                }
                other => other,
            })?;
        }
        for rule in rules() {
            if rule.pattern.is_match(command) {
                return Err(reject(rule.reason));
            }
        }
        for caps in redirection().into_iter().flat_map(|re| re.captures_iter(command)) {
            let target = caps.get(1).map_or("", |m| m.as_str());
            if !(target.starts_with('&') || target == "/dev/null") {
                return Err(reject("redirects output into a file"));
            }
        }
        Ok(())
    }
}

/// Runs probe commands with `sh -c`
#[derive(Debug, Clone)]
pub struct ShellProbe {
    guard: ReadOnlyGuard,
    timeout: Duration,
}

impl ShellProbe {
    /// Probe with a per-command timeout
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            guard: ReadOnlyGuard,
            timeout,
        }
    }
}

impl Default for ShellProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl DiagnosticProbe for ShellProbe {
    async fn run(&self, command: &str) -> Result<String, ProbeError> {
        self.guard.check(command)?;
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::Launch(e.to_string()))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ProbeError::Launch(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            Ok(format!(
                "command failed\nSTDOUT:\n{stdout}\nSTDERR:\n{}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}
