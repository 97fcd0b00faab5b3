//! Run state, policy, results and checkpoints.
//!
//! A run is one execution of the agent loop from a user turn to a
//! terminal status. `RunState` is owned by a single call stack and is the
//! unit of checkpointing.

use crate::error::{CheckpointError, StoreError};
use crate::message::{Message, MessageStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    AwaitingConfirmation,
    AwaitingClarification,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    /// Completed, failed and aborted runs never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// The run is paused on the user and may be resumed.
    pub fn is_awaiting_user(self) -> bool {
        matches!(self, Self::AwaitingConfirmation | Self::AwaitingClarification)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::AwaitingClarification => "awaiting_clarification",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Why a run stopped without a normal final answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    IterationLimitExceeded,
    TokenBudgetExceeded,
    Cancelled,
    DeadlineExceeded,
    GatewayFailure(String),
    Internal(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IterationLimitExceeded => write!(f, "iteration limit exceeded"),
            Self::TokenBudgetExceeded => write!(f, "token budget exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::GatewayFailure(detail) => write!(f, "gateway failure: {detail}"),
            Self::Internal(detail) => write!(f, "internal error: {detail}"),
        }
    }
}

/// What a paused run is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingInput {
    /// A gated tool call needs explicit approval.
    Confirmation {
        tool_call_id: String,
        tool_name: String,
        /// Canonical `name(args)` key identifying the exact action
        action: String,
    },
    /// A tool asked the user a question.
    Clarification { tool_call_id: String, question: String },
}

impl PendingInput {
    /// Text surfaced to the caller.
    pub fn prompt(&self) -> String {
        match self {
            Self::Confirmation { action, .. } => {
                format!("Confirmation required before running {action}. Reply 'yes' to proceed.")
            }
            Self::Clarification { question, .. } => question.clone(),
        }
    }
}

/// Limits applied to a single run.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Maximum tool-dispatch iterations before the forced final answer
    pub max_iterations: u32,
    /// Maximum tokens the run may consume across model calls
    pub max_tokens: u64,
    /// Wall-clock budget for the whole run
    pub deadline: Option<Duration>,
    /// Dispatch the tool calls of one assistant turn concurrently
    pub parallel_tool_calls: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_tokens: 100_000,
            deadline: None,
            parallel_tool_calls: true,
        }
    }
}

/// A digest that stands in for a compacted prefix of the message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    /// Synthetic system message holding the summary
    pub message: Message,
    /// Messages `[1, replaces_through)` of the log are covered by the digest
    pub replaces_through: usize,
}

/// Mutable state of one run.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub messages: MessageStore,
    pub iteration_count: u32,
    pub token_budget_used: u64,
    pub status: RunStatus,
    pub pending: Option<PendingInput>,
    pub digest: Option<Digest>,
}

impl RunState {
    /// Start a run from a system prompt and the user's first message.
    pub fn new(system_prompt: Option<&str>, user_text: &str) -> Self {
        let mut messages = MessageStore::new();
        // A fresh store only rejects tool messages, so these appends cannot fail.
        if let Some(prompt) = system_prompt {
            let _ = messages.append(Message::system(prompt));
        }
        let _ = messages.append(Message::user(user_text));
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Append to the log, keeping causal order.
    pub fn push(&mut self, message: Message) -> Result<(), StoreError> {
        self.messages.append(message)
    }
}

/// What the caller gets back from a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Final answer, question for the user, or best-effort partial text
    pub text: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingInput>,
    pub iterations: u32,
    pub model_calls: u32,
}

/// Version tag written into every checkpoint.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Serialized form of a `RunState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub schema_version: u32,
    pub messages: Vec<Message>,
    pub iteration_count: u32,
    pub token_budget_used: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
}

impl RunCheckpoint {
    pub fn from_state(state: &RunState) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            messages: state.messages.messages().to_vec(),
            iteration_count: state.iteration_count,
            token_budget_used: state.token_budget_used,
            status: state.status,
            pending: state.pending.clone(),
            digest: state.digest.clone(),
        }
    }

    /// Rebuild the run state, re-checking message order.
    pub fn into_state(self) -> Result<RunState, CheckpointError> {
        let messages = MessageStore::from_messages(self.messages)
            .map_err(|e| CheckpointError::Parse(e.to_string()))?;
        Ok(RunState {
            messages,
            iteration_count: self.iteration_count,
            token_budget_used: self.token_budget_used,
            status: self.status,
            pending: self.pending,
            digest: self.digest,
        })
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self).map_err(|e| CheckpointError::Parse(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        // Check the tag first so a future layout is reported as such rather
        // than as a parse failure.
        let raw: serde_json::Value =
            serde_json::from_str(json).map_err(|e| CheckpointError::Parse(e.to_string()))?;
        let tag = raw
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| CheckpointError::Parse("missing schema_version".into()))?;
        let found = u32::try_from(tag).unwrap_or(u32::MAX);
        if found != CHECKPOINT_SCHEMA_VERSION {
            return Err(CheckpointError::UnsupportedSchema {
                found,
                expected: CHECKPOINT_SCHEMA_VERSION,
            });
        }
        serde_json::from_value(raw).map_err(|e| CheckpointError::Parse(e.to_string()))
    }

    /// Write the checkpoint to `path`. The file is written beside the
    /// target and renamed over it, so a crash mid-write leaves the previous
    /// checkpoint intact.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
        }
        let json = self.to_json()?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);
        std::fs::write(&tmp, json).map_err(|e| CheckpointError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            CheckpointError::Io(e.to_string())
        })
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let json = std::fs::read_to_string(path).map_err(|e| CheckpointError::Io(e.to_string()))?;
        Self::from_json(&json)
    }
}
