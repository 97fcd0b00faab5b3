//! Tiered context compaction.
//!
//! Before every model call the controller asks the manager for the window
//! of messages to send. The message log itself is never rewritten: the
//! window is derived from it, and a summary of older history is cached on
//! the run state as a [`Digest`].
//!
//! # Tiers (by estimated usage of `max_context_tokens`)
//!
//! | Usage | Action |
//! |-------|--------|
//! | below prioritize threshold | send everything |
//! | up to summarize threshold | keep system, recent turns and failed tool exchanges |
//! | above summarize threshold | replace older turns with a digest from the model |
//!
//! If a tier leaves the window over budget the next one runs. Oldest
//! recent turns are dropped as a last resort. The leading system message
//! is always sent unchanged.

use crate::context::token;
use agentloop_config::ContextConfig;
use agentloop_core::gateway::{GatewayRequest, ModelGateway, Usage};
use agentloop_core::message::{Message, Role};
use agentloop_core::run::{Digest, RunState};
use agentloop_core::tool::ToolSchema;
use std::ops::Range;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Prefix on every digest message so it is recognisable in transcripts.
pub const DIGEST_HEADER: &str = "Summary of the earlier conversation:";

const SUMMARY_PROMPT: &str = "You compress agent transcripts. Summarize the conversation below \
in a few short bullet points. Keep decisions made, facts learned and the current state of the \
task. Drop greetings and repetition. Reply with the bullet points only.";

const SUMMARY_MAX_TOKENS: u32 = 512;

// ── Types ─────────────────────────────────────────────────────────────────

/// Thresholds for compaction.
#[derive(Debug, Clone)]
pub struct ContextPolicy {
    /// Size of the window the model accepts
    pub max_context_tokens: usize,
    /// Usage fraction at which mid-history is pruned
    pub prioritize_threshold: f32,
    /// Usage fraction at which older history is summarized
    pub summarize_threshold: f32,
    /// Messages always kept verbatim at the end of the window
    pub keep_recent: usize,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl From<&ContextConfig> for ContextPolicy {
    fn from(config: &ContextConfig) -> Self {
        Self {
            max_context_tokens: config.max_context_tokens,
            prioritize_threshold: config.prioritize_threshold,
            summarize_threshold: config.summarize_threshold,
            keep_recent: config.keep_recent,
        }
    }
}

/// Which compaction step produced a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionTier {
    None,
    Prioritized,
    Summarized,
    Truncated,
}

impl CompactionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Prioritized => "prioritized",
            Self::Summarized => "summarized",
            Self::Truncated => "truncated",
        }
    }
}

/// The messages to send on the next model call.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    pub messages: Vec<Message>,
    pub tier: CompactionTier,
    /// Estimate for the uncompacted view, tool schemas included
    pub tokens_before: usize,
    /// Estimate for `messages`, tool schemas included
    pub tokens_after: usize,
    /// Tokens spent on a summarization call, if one was made
    pub summary_usage: Option<Usage>,
}

/// Errors from context preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The system message and tool schemas alone do not fit.
    BudgetExceeded { required: usize, budget: usize },
    /// The run was cancelled while a summary was being generated.
    Cancelled,
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExceeded { required, budget } => write!(
                f,
                "context needs at least {required} tokens but the budget is {budget}"
            ),
            Self::Cancelled => write!(f, "cancelled while summarizing the context"),
        }
    }
}

impl std::error::Error for ContextError {}

// ── Manager ───────────────────────────────────────────────────────────────

/// Builds the per-call window from a run's message log.
pub struct ContextManager {
    policy: ContextPolicy,
    gateway: Arc<dyn ModelGateway>,
    model: String,
}

impl ContextManager {
    pub fn new(policy: ContextPolicy, gateway: Arc<dyn ModelGateway>, model: impl Into<String>) -> Self {
        Self {
            policy,
            gateway,
            model: model.into(),
        }
    }

    pub fn policy(&self) -> &ContextPolicy {
        &self.policy
    }

    /// Prepare the window for the next model call.
    ///
    /// With `force` set the summarization tier runs regardless of usage;
    /// the controller does this before its final call on an exhausted
    /// token budget. A summarization call in flight is abandoned as soon
    /// as `cancel` fires.
    pub async fn prepare(
        &self,
        state: &mut RunState,
        tools: &[ToolSchema],
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<ContextWindow, ContextError> {
        let max = self.policy.max_context_tokens;
        let fixed = token::estimate_schemas_tokens(tools);
        let log = state.messages.messages();
        let system = state.messages.system().cloned();
        let body_start = usize::from(system.is_some());
        let start = state
            .digest
            .as_ref()
            .map_or(body_start, |d| d.replaces_through.max(body_start))
            .min(log.len());
        let digest = state.digest.as_ref().map(|d| d.message.clone());

        let head: Vec<Message> = system.iter().chain(digest.iter()).cloned().collect();
        let mut full = head.clone();
        full.extend_from_slice(&log[start..]);
        let tokens_before = fixed + token::estimate_messages_tokens(&full);

        let minimum = fixed + system.as_ref().map_or(0, token::estimate_message_tokens);
        if minimum > max {
            return Err(ContextError::BudgetExceeded {
                required: minimum,
                budget: max,
            });
        }

        let usage = tokens_before as f32 / max.max(1) as f32;
        if !force && usage < self.policy.prioritize_threshold {
            return Ok(ContextWindow {
                messages: full,
                tier: CompactionTier::None,
                tokens_before,
                tokens_after: tokens_before,
                summary_usage: None,
            });
        }

        let recent_start = recent_cut(log, start, self.policy.keep_recent);
        let recent = &log[recent_start..];

        if !force && usage <= self.policy.summarize_threshold {
            let mut window = head.clone();
            for group in groups(log, start..recent_start) {
                if group_has_error(&log[group.clone()]) {
                    window.extend_from_slice(&log[group]);
                }
            }
            window.extend_from_slice(recent);
            let tokens_after = fixed + token::estimate_messages_tokens(&window);
            if tokens_after <= max {
                debug!(tokens_before, tokens_after, "Context prioritized");
                return Ok(ContextWindow {
                    messages: window,
                    tier: CompactionTier::Prioritized,
                    tokens_before,
                    tokens_after,
                    summary_usage: None,
                });
            }
        }

        // Summarize whatever sits between the head and the recent turns,
        // folding any earlier digest into the new one.
        let older = &log[start..recent_start];
        let mut summary_usage = None;
        let mut new_digest = None;
        if !older.is_empty() {
            let summary = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ContextError::Cancelled),
                summary = self.summarize(digest.as_ref(), older) => summary,
            };
            match summary {
                Ok((text, usage)) => {
                    summary_usage = usage;
                    new_digest = Some(Digest {
                        message: Message::system(format!("{DIGEST_HEADER}\n{text}")),
                        replaces_through: recent_start,
                    });
                }
                Err(e) => warn!(error = %e, "Summarization failed, truncating instead"),
            }
        }

        let summarized = new_digest.is_some();
        // Older turns left out without a summary count as truncation.
        let lost_older = !older.is_empty() && !summarized;
        let digest_message = match &new_digest {
            Some(d) => Some(d.message.clone()),
            None => digest.clone(),
        };
        if let Some(d) = new_digest {
            state.digest = Some(d);
        }
        let log = state.messages.messages();
        let untrimmed = usize::from(system.is_some())
            + usize::from(digest_message.is_some())
            + (log.len() - recent_start);

        let mut window = fit(system.as_ref(), digest_message, log, recent_start, fixed, max);
        let mut tokens_after = fixed + token::estimate_messages_tokens(&window);
        if tokens_after > max {
            // Unreachable once `minimum` fits, but never send an oversized window.
            window = system.iter().cloned().collect();
            tokens_after = fixed + token::estimate_messages_tokens(&window);
        }
        let tier = if lost_older || window.len() < untrimmed {
            CompactionTier::Truncated
        } else if summarized {
            CompactionTier::Summarized
        } else {
            CompactionTier::None
        };

        debug!(tier = tier.as_str(), tokens_before, tokens_after, "Context compacted");
        Ok(ContextWindow {
            messages: window,
            tier,
            tokens_before,
            tokens_after,
            summary_usage,
        })
    }

    /// Ask the model for a digest of `older`, prefixed by any earlier digest.
    async fn summarize(
        &self,
        previous: Option<&Message>,
        older: &[Message],
    ) -> Result<(String, Option<Usage>), agentloop_core::error::GatewayError> {
        let mut transcript = String::new();
        if let Some(previous) = previous {
            transcript.push_str(previous.text());
            transcript.push_str("\n\n");
        }
        transcript.push_str(&render_transcript(older));

        let request = GatewayRequest {
            model: self.model.clone(),
            messages: vec![Message::system(SUMMARY_PROMPT), Message::user(transcript)],
            temperature: 0.0,
            max_tokens: Some(SUMMARY_MAX_TOKENS),
            tools: Vec::new(),
        };
        let response = self.gateway.complete(request).await?;
        Ok((response.message.text().trim().to_string(), response.usage))
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

/// Index where the verbatim tail starts: at least `keep` messages back,
/// moved earlier so the tail never opens on a tool result.
fn recent_cut(log: &[Message], start: usize, keep: usize) -> usize {
    let mut cut = log.len().saturating_sub(keep).max(start);
    while cut > start && cut < log.len() && log[cut].role == Role::Tool {
        cut -= 1;
    }
    cut
}

/// Split a log range into units that must be kept or dropped together:
/// an assistant tool-call turn with its results, or a single message.
fn groups(log: &[Message], range: Range<usize>) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut i = range.start;
    while i < range.end {
        let mut j = i + 1;
        if log[i].has_tool_calls() {
            while j < range.end && log[j].role == Role::Tool {
                j += 1;
            }
        }
        out.push(i..j);
        i = j;
    }
    out
}

fn group_has_error(group: &[Message]) -> bool {
    group
        .iter()
        .any(|m| m.role == Role::Tool && m.text().starts_with("Error"))
}

/// System, digest and as many of the newest groups after `recent_start`
/// as fit under `max`. The digest goes before recent turns are dropped
/// entirely.
fn fit(
    system: Option<&Message>,
    digest: Option<Message>,
    log: &[Message],
    recent_start: usize,
    fixed: usize,
    max: usize,
) -> Vec<Message> {
    let recent_groups = groups(log, recent_start..log.len());
    let mut first = 0;
    let assemble = |digest: Option<&Message>, first: usize| -> Vec<Message> {
        let mut window: Vec<Message> = system.into_iter().chain(digest).cloned().collect();
        if let Some(group) = recent_groups.get(first) {
            window.extend_from_slice(&log[group.start..]);
        }
        window
    };

    let mut window = assemble(digest.as_ref(), first);
    while fixed + token::estimate_messages_tokens(&window) > max && first + 1 < recent_groups.len() {
        first += 1;
        window = assemble(digest.as_ref(), first);
    }
    if fixed + token::estimate_messages_tokens(&window) > max && digest.is_some() {
        window = assemble(None, first);
    }
    window
}

fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for m in messages {
        match m.role {
            Role::System => out.push_str(&format!("system: {}\n", m.text())),
            Role::User => out.push_str(&format!("user: {}\n", m.text())),
            Role::Assistant => {
                if !m.text().is_empty() {
                    out.push_str(&format!("assistant: {}\n", m.text()));
                }
                for call in &m.tool_calls {
                    out.push_str(&format!("assistant called {}({})\n", call.tool_name, call.arguments));
                }
            }
            Role::Tool => out.push_str(&format!("tool result: {}\n", m.text())),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedGateway, make_text_response};
    use agentloop_core::message::ToolCallRequest;

    fn policy(max: usize) -> ContextPolicy {
        ContextPolicy {
            max_context_tokens: max,
            prioritize_threshold: 0.8,
            summarize_threshold: 0.9,
            keep_recent: 2,
        }
    }

    fn manager(max: usize, gateway: Arc<ScriptedGateway>) -> ContextManager {
        ContextManager::new(policy(max), gateway, "mock-model")
    }

    /// System + user, then `turns` tool exchanges with ~100-char results.
    fn long_run(turns: usize, failing_turn: Option<usize>) -> RunState {
        let mut state = RunState::new(Some("You are a DevOps assistant."), "check every host");
        for i in 0..turns {
            let id = format!("c{i}");
            state
                .push(Message::assistant_tool_calls(
                    None,
                    vec![ToolCallRequest::new(&id, "ping", format!(r#"{{"host":"h{i}"}}"#))],
                ))
                .unwrap();
            let text = if failing_turn == Some(i) {
                format!("Error: ping failed: host h{i} unreachable {}", "x".repeat(60))
            } else {
                format!("Host h{i} is reachable. Latency: 5ms {}", "y".repeat(70))
            };
            state.push(Message::tool_result(&id, text)).unwrap();
        }
        state
    }

    fn idle() -> CancellationToken {
        CancellationToken::new()
    }

    fn estimate(messages: &[Message]) -> usize {
        token::estimate_messages_tokens(messages)
    }

    #[tokio::test]
    async fn below_threshold_is_noop() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![]));
        let mgr = manager(10_000, gateway.clone());
        let mut state = long_run(3, None);

        let window = mgr.prepare(&mut state, &[], false, &idle()).await.unwrap();
        assert_eq!(window.tier, CompactionTier::None);
        assert_eq!(window.messages.len(), state.messages.len());
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_summary_leaves_state_untouched() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![make_text_response("- digest")]));
        let mgr = manager(10_000, gateway.clone());
        let mut state = long_run(4, None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = mgr.prepare(&mut state, &[], true, &cancel).await.unwrap_err();
        assert!(matches!(err, ContextError::Cancelled));
        assert!(state.digest.is_none());
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn prioritization_keeps_errors_and_recent_turns() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![]));
        let mut state = long_run(6, Some(1));
        let total = estimate(state.messages.messages());
        // Put usage at ~85%.
        let mgr = manager(total * 100 / 85, gateway.clone());

        let window = mgr.prepare(&mut state, &[], false, &idle()).await.unwrap();
        assert_eq!(window.tier, CompactionTier::Prioritized);
        assert_eq!(gateway.call_count(), 0);
        assert_eq!(window.messages[0], state.messages.messages()[0]);
        assert!(window.messages.iter().any(|m| m.text().starts_with("Error: ping failed: host h1")));
        assert!(!window.messages.iter().any(|m| m.text().contains("Host h2 ")));
        assert!(window.messages.iter().any(|m| m.text().contains("Host h5 ")));
        assert!(window.tokens_after <= mgr.policy().max_context_tokens);
    }

    #[tokio::test]
    async fn summarization_replaces_older_turns_with_digest() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![make_text_response(
            "- hosts h0..h3 reachable",
        )]));
        let mut state = long_run(6, None);
        let total = estimate(state.messages.messages());
        let mgr = manager(total * 100 / 95, gateway.clone());
        let system_before = state.messages.messages()[0].clone();

        let window = mgr.prepare(&mut state, &[], false, &idle()).await.unwrap();
        assert_eq!(window.tier, CompactionTier::Summarized);
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(window.messages[0], system_before);
        assert!(window.messages[1].text().starts_with(DIGEST_HEADER));
        assert!(window.messages[1].text().contains("h0..h3"));
        assert!(window.tokens_after <= mgr.policy().max_context_tokens);
        assert!(window.summary_usage.is_some());

        let digest = state.digest.as_ref().unwrap();
        assert_eq!(digest.replaces_through, state.messages.len() - 2);
        // The log is untouched.
        assert_eq!(state.messages.len(), 14);

        // The summarizer sees the transcript, not the tools.
        let requests = gateway.requests();
        let request = &requests[0];
        assert!(request.tools.is_empty());
        assert!(request.messages[1].text().contains("assistant called ping"));
    }

    #[tokio::test]
    async fn cached_digest_is_reused() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![make_text_response("- all good")]));
        let mut state = long_run(6, None);
        let total = estimate(state.messages.messages());
        let mgr = manager(total * 100 / 95, gateway.clone());

        mgr.prepare(&mut state, &[], false, &idle()).await.unwrap();
        let window = mgr.prepare(&mut state, &[], false, &idle()).await.unwrap();
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(window.tier, CompactionTier::None);
        assert!(window.messages[1].text().contains("all good"));
    }

    #[tokio::test]
    async fn window_never_starts_recent_tail_with_tool_result() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![make_text_response("- digest")]));
        let mut state = long_run(6, None);
        let total = estimate(state.messages.messages());
        let mgr = ContextManager::new(
            ContextPolicy {
                keep_recent: 1,
                ..policy(total * 100 / 95)
            },
            gateway,
            "mock-model",
        );

        let window = mgr.prepare(&mut state, &[], false, &idle()).await.unwrap();
        let after_head = &window.messages[2];
        assert_ne!(after_head.role, Role::Tool);
        assert!(after_head.has_tool_calls());
    }

    #[tokio::test]
    async fn summary_failure_falls_back_to_truncation() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Err(
            agentloop_core::error::GatewayError::Timeout(60),
        )]));
        let mut state = long_run(6, None);
        let total = estimate(state.messages.messages());
        let mgr = manager(total * 100 / 95, gateway);

        let window = mgr.prepare(&mut state, &[], false, &idle()).await.unwrap();
        assert_eq!(window.tier, CompactionTier::Truncated);
        assert!(state.digest.is_none());
        assert!(window.tokens_after <= mgr.policy().max_context_tokens);
        assert_eq!(window.messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn tight_budget_drops_oldest_recent_turns() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![make_text_response("- d")]));
        let mut state = long_run(6, None);
        let mgr = ContextManager::new(
            ContextPolicy {
                keep_recent: 12,
                ..policy(120)
            },
            gateway,
            "mock-model",
        );

        let window = mgr.prepare(&mut state, &[], false, &idle()).await.unwrap();
        assert_eq!(window.tier, CompactionTier::Truncated);
        assert!(window.tokens_after <= 120);
        assert_eq!(window.messages[0].text(), "You are a DevOps assistant.");
        assert_eq!(window.messages.last().unwrap(), state.messages.last().unwrap());
    }

    #[tokio::test]
    async fn forced_compaction_summarizes_under_threshold() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![make_text_response("- forced")]));
        let mut state = long_run(6, None);
        let mgr = manager(100_000, gateway.clone());

        let window = mgr.prepare(&mut state, &[], true, &idle()).await.unwrap();
        assert_eq!(window.tier, CompactionTier::Summarized);
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn oversized_system_prompt_is_an_error() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![]));
        let mgr = manager(10, gateway);
        let mut state = RunState::new(Some(&"s".repeat(400)), "hi");

        let err = mgr.prepare(&mut state, &[], false, &idle()).await.unwrap_err();
        assert!(matches!(err, ContextError::BudgetExceeded { budget: 10, .. }));
    }

    #[test]
    fn groups_bind_tool_results_to_their_request() {
        let state = long_run(2, None);
        let log = state.messages.messages();
        let g = groups(log, 1..log.len());
        assert_eq!(g, vec![1..2, 2..4, 4..6]);
    }
}
