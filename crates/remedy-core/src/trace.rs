//! Conversation traces
//!
//! A `ConversationTrace` is shared between the orchestrator and the running
//! strategy. Messages and attempts are recorded as they happen, so a trial
//! cut short by its deadline still reports what was done.

use crate::error::TraceError;
use crate::types::{FailureSpec, RemediationAttempt, TrialId, TrialResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author
    pub role: ChatRole,
    /// Text content
    pub content: String,
}

impl ChatMessage {
    /// Create a message
    #[inline]
    #[must_use]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// System message
    #[inline]
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    /// User message
    #[inline]
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Assistant message
    #[inline]
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

#[derive(Debug, Default)]
struct TraceInner {
    messages: Vec<ChatMessage>,
    attempts: Vec<RemediationAttempt>,
}

/// Shared, append-only record of a trial's conversation
#[derive(Debug, Clone, Default)]
pub struct ConversationTrace {
    inner: Arc<Mutex<TraceInner>>,
}

impl ConversationTrace {
    /// Create an empty trace
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message
    pub fn push(&self, message: ChatMessage) {
        self.inner.lock().messages.push(message);
    }

    /// Append a completed attempt
    pub fn record_attempt(&self, attempt: RemediationAttempt) {
        self.inner.lock().attempts.push(attempt);
    }

    /// Snapshot of the messages
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    /// Snapshot of the attempts
    #[must_use]
    pub fn attempts(&self) -> Vec<RemediationAttempt> {
        self.inner.lock().attempts.clone()
    }

    /// Number of recorded attempts
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.inner.lock().attempts.len()
    }

    /// Rough token count, one token per four characters of serialized message
    #[must_use]
    pub fn token_estimate(&self) -> usize {
        let chars: usize = self
            .inner
            .lock()
            .messages
            .iter()
            .map(|m| serde_json::to_string(m).map_or(m.content.len(), |s| s.chars().count()))
            .sum();
        chars / 4
    }
}

#[derive(Serialize)]
struct TraceMetadata<'a> {
    generated_at: DateTime<Utc>,
    trial_id: String,
    experiment_id: &'a str,
    target: String,
    category: &'a str,
    outcome: String,
    final_status: &'static str,
    retries: usize,
    token_count: usize,
    remediation_time: f64,
    duration: f64,
}

#[derive(Serialize)]
struct TraceDocument<'a> {
    metadata: TraceMetadata<'a>,
    attempts: &'a [RemediationAttempt],
    conversation: Vec<ChatMessage>,
}

/// Writes traces under a save directory
#[derive(Debug, Clone)]
pub struct TraceStore {
    root: PathBuf,
}

impl TraceStore {
    /// Create a store rooted at `root`
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Save directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File a trial's trace is written to: `<target>_<category>_<unix>_<trial>.json`
    ///
    /// The trial id keeps two trials started in the same second apart.
    #[must_use]
    pub fn path_for(&self, spec: &FailureSpec, trial: TrialId, at: DateTime<Utc>) -> PathBuf {
        self.root.join(format!(
            "{}_{}_{}_{}.json",
            spec.target.workload,
            spec.category,
            at.timestamp(),
            trial
        ))
    }

    /// Write a trace document for a finished trial
    pub async fn persist(
        &self,
        path: &Path,
        result: &TrialResult,
        trace: &ConversationTrace,
    ) -> Result<(), TraceError> {
        let attempts = trace.attempts();
        let document = TraceDocument {
            metadata: TraceMetadata {
                generated_at: Utc::now(),
                trial_id: result.trial_id.to_string(),
                experiment_id: &result.spec.experiment_id,
                target: result.spec.target.to_string(),
                category: result.spec.category.as_str(),
                outcome: result.outcome.to_string(),
                final_status: if result.outcome.is_recovered() {
                    "success"
                } else {
                    "failed"
                },
                retries: result.attempts.len(),
                token_count: result.token_estimate,
                remediation_time: result.remediation_time.as_secs_f64(),
                duration: result.duration.as_secs_f64(),
            },
            attempts: &attempts,
            conversation: trace.messages(),
        };
        let json = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| TraceError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|source| TraceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(path = %path.display(), "conversation trace saved");
        Ok(())
    }
}
