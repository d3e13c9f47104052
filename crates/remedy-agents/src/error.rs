//! Error types for remedy-agents

use remedy_core::HarnessError;

/// Generative backend errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The request never got an answer
    #[error("backend transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The answer could not be decoded
    #[error("cannot decode backend response: {0}")]
    Decode(String),

    /// A hosted endpoint was selected without credentials
    #[error("LLM_API_KEY is not set for hosted model {0}")]
    MissingApiKey(String),
}

impl BackendError {
    /// Whether retrying the same request may help
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::MissingApiKey(_) => false,
        }
    }
}

/// Errors while running a remediation action
///
/// These never leave a strategy's loop; they are reported back to the
/// coordinator as a failed iteration.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The action is not a runnable playbook
    #[error("malformed playbook: {0}")]
    Malformed(String),

    /// The playbook file could not be written
    #[error("cannot write playbook {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The runner could not be started
    #[error("cannot launch {program}: {reason}")]
    Launch { program: String, reason: String },

    /// The runner exited unsuccessfully
    #[error("playbook failed with exit code {exit_code}")]
    Failed { exit_code: i32, output: String },

    /// The runner ran past its timeout
    #[error("playbook timed out after {0}s")]
    Timeout(u64),
}

impl ExecutionError {
    /// Text fed back to the coordinator
    #[must_use]
    pub fn feedback(&self) -> String {
        match self {
            Self::Failed { exit_code, output } => {
                format!("playbook execution failed (exit code {exit_code})\n{output}")
            }
            other => other.to_string(),
        }
    }
}

impl From<ExecutionError> for HarnessError {
    fn from(err: ExecutionError) -> Self {
        Self::Execution(err.to_string())
    }
}

/// Diagnostic probe errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The command would mutate the environment
    #[error("command rejected, probes are read-only: {command} ({reason})")]
    Rejected { command: String, reason: String },

    /// The shell could not be started
    #[error("cannot launch probe command: {0}")]
    Launch(String),

    /// The command ran past its timeout
    #[error("probe command timed out after {0}s")]
    Timeout(u64),
}
