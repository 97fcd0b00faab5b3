//! Tool executor: lookup, argument validation, risk gating and bounded
//! execution for the calls of one assistant turn.
//!
//! Every call produces a [`ToolOutcome`]. Outcomes stay typed until the
//! controller turns them into Tool message text, so a failing call is an
//! observation for the model and never a failure of the run.

use agentloop_core::error::ToolError;
use agentloop_core::message::{Message, Role, ToolCallRequest};
use agentloop_core::tool::{ToolOutput, ToolRegistry};
use futures::FutureExt;
use futures::future::join_all;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Marker a gated tool call leaves in the log instead of running.
pub const CONFIRMATION_SENTINEL: &str = "REQUIRES_CONFIRMATION";

/// Replies that approve a pending action.
const AFFIRMATIVE_WORDS: &[&str] = &[
    "yes", "y", "yep", "yeah", "confirm", "confirmed", "approve", "approved", "proceed", "ok",
    "okay", "sure",
];

const AFFIRMATIVE_PHRASES: &[&str] = &["go ahead", "do it"];

/// Result of dispatching one tool call.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Ok(String),
    Err(ToolError),
    /// The call is gated and no matching approval exists yet.
    NeedsConfirmation { action: String },
    /// The tool asked the user a question.
    Clarify(String),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok(_) | Self::Clarify(_))
    }

    /// Text for the Tool message answering the call.
    pub fn to_message_text(&self) -> String {
        match self {
            Self::Ok(text) => text.clone(),
            Self::Err(e) => format!("Error: {e}"),
            Self::NeedsConfirmation { action } => confirmation_sentinel(action),
            Self::Clarify(question) => format!("Waiting for the user to answer: {question}"),
        }
    }
}

/// A dispatched call with its outcome and wall time.
#[derive(Debug, Clone)]
pub struct ExecutedCall {
    pub call: ToolCallRequest,
    pub outcome: ToolOutcome,
    pub duration: Duration,
}

/// Runs tool calls against a read-only registry.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Dispatch every call of one assistant turn.
    ///
    /// Results come back in call order. In parallel mode the calls run
    /// concurrently and a failing sibling never cancels the others.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCallRequest],
        history: &[Message],
        parallel: bool,
        cancel: &CancellationToken,
    ) -> Vec<ExecutedCall> {
        if parallel && calls.len() > 1 {
            debug!(count = calls.len(), "Dispatching tool calls concurrently");
            join_all(calls.iter().map(|c| self.execute_timed(c, history, cancel))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute_timed(call, history, cancel).await);
            }
            results
        }
    }

    async fn execute_timed(
        &self,
        call: &ToolCallRequest,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> ExecutedCall {
        let started = Instant::now();
        let outcome = self.execute(call, history, cancel).await;
        ExecutedCall {
            call: call.clone(),
            outcome,
            duration: started.elapsed(),
        }
    }

    /// Dispatch a single call.
    pub async fn execute(
        &self,
        call: &ToolCallRequest,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        let Some(tool) = self.registry.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, "Model requested an unknown tool");
            return ToolOutcome::Err(ToolError::NotFound(call.tool_name.clone()));
        };

        let arguments = match parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => return ToolOutcome::Err(e),
        };
        if let Err(e) = self.registry.validate(&call.tool_name, &arguments) {
            return ToolOutcome::Err(e);
        }

        let gated = self
            .registry
            .definition(&call.tool_name)
            .is_some_and(|d| d.needs_confirmation());
        if gated {
            let action = action_key(&call.tool_name, &arguments);
            if !confirmation_granted(history, &action) {
                debug!(tool = %call.tool_name, %action, "Tool call held for confirmation");
                return ToolOutcome::NeedsConfirmation { action };
            }
            debug!(tool = %call.tool_name, %action, "Running confirmed tool call");
        }

        let name = call.tool_name.clone();
        let run = AssertUnwindSafe(tool.execute(arguments)).catch_unwind();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Cancelled { tool_name: name.clone() }),
            res = tokio::time::timeout(self.timeout, run) => match res {
                Err(_) => Err(ToolError::Timeout {
                    tool_name: name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                }),
                Ok(Err(panic)) => Err(ToolError::Panicked {
                    tool_name: name.clone(),
                    reason: panic_message(panic.as_ref()),
                }),
                Ok(Ok(result)) => result,
            },
        };

        match result {
            Ok(ToolOutput::Text(text)) => ToolOutcome::Ok(text),
            Ok(ToolOutput::Clarify(question)) => ToolOutcome::Clarify(question),
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                ToolOutcome::Err(e)
            }
        }
    }
}

/// Parse raw model arguments. An empty string means no arguments.
fn parse_arguments(raw: &str) -> Result<serde_json::Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))
}

/// Canonical key for an exact invocation: `name(args)` with object keys sorted.
///
/// `serde_json::Value` objects are ordered maps, so re-serializing gives a
/// stable form regardless of how the model ordered the keys.
pub fn action_key(tool_name: &str, arguments: &serde_json::Value) -> String {
    format!("{tool_name}({arguments})")
}

/// Key for a raw call, or `None` when its arguments do not parse.
pub fn call_action_key(call: &ToolCallRequest) -> Option<String> {
    parse_arguments(&call.arguments)
        .ok()
        .map(|args| action_key(&call.tool_name, &args))
}

pub fn confirmation_sentinel(action: &str) -> String {
    format!("{CONFIRMATION_SENTINEL}: {action}")
}

/// Whether a user reply approves a pending action.
pub fn is_affirmative(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(['.', '!'])
        .to_lowercase();
    if AFFIRMATIVE_PHRASES.contains(&normalized.as_str()) {
        return true;
    }
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .is_some_and(|first| AFFIRMATIVE_WORDS.contains(&first))
}

/// Whether `history` holds an unused approval for `action`.
///
/// An approval is an affirmative User message after the sentinel for the
/// same action. It is spent once a later call with that action key ran.
pub fn confirmation_granted(history: &[Message], action: &str) -> bool {
    let sentinel = confirmation_sentinel(action);
    let Some(asked) = history
        .iter()
        .rposition(|m| m.role == Role::Tool && m.text() == sentinel)
    else {
        return false;
    };
    let Some(offset) = history[asked + 1..]
        .iter()
        .position(|m| m.role == Role::User && is_affirmative(m.text()))
    else {
        return false;
    };

    let after = &history[asked + 1 + offset..];
    let spent = after
        .iter()
        .flat_map(|m| m.tool_calls.iter())
        .filter(|c| call_action_key(c).as_deref() == Some(action))
        .any(|c| {
            after.iter().any(|m| {
                m.role == Role::Tool
                    && m.tool_call_id.as_deref() == Some(c.id.as_str())
                    && m.text() != sentinel
            })
        });
    !spent
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
