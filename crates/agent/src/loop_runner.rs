//! The agent loop controller.
//!
//! A run is an explicit state machine over one [`RunState`]:
//!
//! ```text
//! CallModel ──tool calls──▶ Dispatch ──▶ CallModel
//!     │                        └──gated / question──▶ Finish (awaiting user)
//!     ├──text──▶ Finish (completed)
//!     └──limit──▶ ForceFinal ──▶ Finish (aborted, best-effort text)
//! ```
//!
//! Every model reply and every tool result is appended to the message log
//! before the next step. Failures end the run with a status and text;
//! callers never get a bare error.

use crate::context::{
    CompactionTier, ContextError, ContextManager, ContextPolicy, ContextWindow, token,
};
use crate::executor::{ExecutedCall, ToolExecutor, ToolOutcome};
use crate::facts;
use agentloop_config::AppConfig;
use agentloop_core::error::GatewayError;
use agentloop_core::event::{DomainEvent, EventBus};
use agentloop_core::gateway::{GatewayRequest, GatewayResponse, ModelGateway, ModelReply};
use agentloop_core::memory::FactStore;
use agentloop_core::message::{Message, Role, ToolCallRequest};
use agentloop_core::run::{PendingInput, RunPolicy, RunResult, RunState, RunStatus, StopReason};
use agentloop_core::tool::{ToolDefinition, ToolRegistry, ToolSchema};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const FINAL_ANSWER_NUDGE: &str = "Tools are no longer available for this request. Answer the \
user now using only the information gathered so far, and say what is still unknown.";

/// Backoff for transient gateway failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay, stretched to honour a backend's `retry-after`.
    pub fn delay_for(&self, attempt: u32, error: &GatewayError) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        match error {
            GatewayError::RateLimited { retry_after_secs } => {
                backoff.max(Duration::from_secs(*retry_after_secs))
            }
            _ => backoff,
        }
    }
}

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    /// The completion backend
    gateway: Arc<dyn ModelGateway>,

    /// The model to use
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Default max tokens per response
    max_response_tokens: Option<u32>,

    /// Leading system message for new runs
    system_prompt: Option<String>,

    /// Dispatches tool calls against the registry
    executor: ToolExecutor,

    /// Builds the window sent on each call
    context: ContextManager,

    /// Per-run limits
    policy: RunPolicy,

    retry: RetryPolicy,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,

    /// Optional fact store for recall and extraction
    facts: Option<Arc<dyn FactStore>>,

    /// Maximum facts recalled per run
    recall_limit: usize,

    /// Extract facts after a completed run
    auto_extract: bool,

    /// Lifetime given to extracted facts
    fact_ttl_secs: Option<u64>,

    /// Called with the run state after every appended step
    checkpoint: Option<CheckpointHook>,

    /// Offer only this many tools, chosen by keyword match on the request
    tool_top_k: Option<usize>,
}

/// Persists the run state between steps so a crash loses at most one step.
pub type CheckpointHook = Arc<dyn Fn(&RunState) + Send + Sync>;

/// Per-run bookkeeping that is not part of the checkpointed state.
struct RunCtx {
    run_id: String,
    token: CancellationToken,
    deadline: Option<Instant>,
    model_calls: u32,
}

impl RunCtx {
    /// Why the run must stop now, if it must.
    fn interruption(&self) -> Option<StopReason> {
        if !self.token.is_cancelled() {
            return None;
        }
        if self.deadline.is_some_and(|at| Instant::now() >= at) {
            Some(StopReason::DeadlineExceeded)
        } else {
            Some(StopReason::Cancelled)
        }
    }
}

/// Cancels the run token when the deadline passes.
struct DeadlineGuard(tokio::task::JoinHandle<()>);

impl DeadlineGuard {
    fn arm(at: Instant, token: CancellationToken) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            token.cancel();
        }))
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Step {
    CallModel,
    Dispatch(Vec<ToolCallRequest>),
    ForceFinal(StopReason),
    Finish(Outcome),
}

enum Outcome {
    Completed(String),
    Paused(PendingInput),
    Stopped {
        status: RunStatus,
        reason: StopReason,
        text: Option<String>,
    },
}

enum CallError {
    Interrupted(StopReason),
    Gateway(GatewayError),
}

impl AgentLoop {
    /// Create a new agent loop with default limits.
    pub fn new(gateway: Arc<dyn ModelGateway>, model: impl Into<String>, tools: ToolRegistry) -> Self {
        let model = model.into();
        Self {
            context: ContextManager::new(ContextPolicy::default(), gateway.clone(), model.clone()),
            gateway,
            model,
            temperature: 0.7,
            max_response_tokens: None,
            system_prompt: None,
            executor: ToolExecutor::new(tools, Duration::from_secs(30)),
            policy: RunPolicy::default(),
            retry: RetryPolicy::default(),
            event_bus: Arc::new(EventBus::default()),
            facts: None,
            recall_limit: 5,
            auto_extract: false,
            fact_ttl_secs: None,
            checkpoint: None,
            tool_top_k: None,
        }
    }

    /// Build a loop from the application config.
    pub fn from_config(config: &AppConfig, gateway: Arc<dyn ModelGateway>, tools: ToolRegistry) -> Self {
        let policy = RunPolicy {
            max_iterations: config.agent.max_iterations,
            max_tokens: config.agent.max_tokens,
            deadline: config.agent.run_timeout_secs.map(Duration::from_secs),
            parallel_tool_calls: config.agent.parallel_tool_calls,
        };
        let mut agent = Self::new(gateway, &config.gateway.model, tools)
            .with_system_prompt(&config.agent.system_prompt)
            .with_temperature(config.gateway.temperature)
            .with_policy(policy)
            .with_retry(RetryPolicy {
                max_retries: config.gateway.max_retries,
                base_delay: Duration::from_millis(config.gateway.retry_base_delay_ms),
            })
            .with_tool_timeout(Duration::from_secs(config.tools.timeout_secs))
            .with_context_policy(ContextPolicy::from(&config.context))
            .with_recall_limit(config.memory.recall_limit)
            .with_auto_extract(config.memory.auto_extract);
        agent.max_response_tokens = config.gateway.max_response_tokens;
        agent.fact_ttl_secs = config.memory.default_ttl_secs;
        agent.tool_top_k = config.tools.retrieval_top_k;
        agent
    }

    /// A loop for a nested run: same backend and retry behaviour, its own
    /// prompt, tools and iteration limit, no fact memory.
    pub fn subagent(&self, role_prompt: &str, tools: ToolRegistry, max_iterations: u32) -> Self {
        Self {
            gateway: self.gateway.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_response_tokens: self.max_response_tokens,
            system_prompt: Some(role_prompt.to_string()),
            executor: ToolExecutor::new(tools, self.executor.timeout()),
            context: ContextManager::new(
                self.context.policy().clone(),
                self.gateway.clone(),
                self.model.clone(),
            ),
            policy: RunPolicy {
                max_iterations,
                deadline: None,
                ..self.policy.clone()
            },
            retry: self.retry.clone(),
            event_bus: self.event_bus.clone(),
            facts: None,
            recall_limit: 0,
            auto_extract: false,
            fact_ttl_secs: None,
            checkpoint: None,
            tool_top_k: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per model response.
    pub fn with_max_response_tokens(mut self, max: u32) -> Self {
        self.max_response_tokens = Some(max);
        self
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the maximum number of tool-dispatch iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.policy.max_iterations = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.executor = ToolExecutor::new(self.executor.registry().clone(), timeout);
        self
    }

    pub fn with_context_policy(mut self, policy: ContextPolicy) -> Self {
        self.context = ContextManager::new(policy, self.gateway.clone(), self.model.clone());
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Attach a fact store for recall at run start.
    pub fn with_fact_store(mut self, store: Arc<dyn FactStore>) -> Self {
        self.facts = Some(store);
        self
    }

    /// Set the maximum number of facts recalled per run.
    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    /// Enable or disable fact extraction after completed runs.
    pub fn with_tool_retrieval(mut self, top_k: usize) -> Self {
        self.tool_top_k = Some(top_k);
        self
    }

    pub fn with_checkpoint(mut self, hook: CheckpointHook) -> Self {
        self.checkpoint = Some(hook);
        self
    }

    pub fn with_auto_extract(mut self, enabled: bool) -> Self {
        self.auto_extract = enabled;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.executor.registry()
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run a fresh user turn to a terminal or paused status.
    pub async fn run(&self, user_text: &str) -> RunResult {
        let mut state = self.start(user_text).await;
        self.drive(&mut state, &CancellationToken::new()).await
    }

    /// Create the state for a new run, recalling facts into the system prompt.
    ///
    /// The system message is fixed here and stays byte-identical for the
    /// rest of the run.
    pub async fn start(&self, user_text: &str) -> RunState {
        let recalled = self.recall_facts(user_text).await;
        let fact_context = facts::format_fact_context(&recalled);
        let prompt = match &self.system_prompt {
            Some(prompt) => Some(format!("{prompt}{fact_context}")),
            None if !fact_context.is_empty() => Some(fact_context.trim_start().to_string()),
            None => None,
        };
        RunState::new(prompt.as_deref(), user_text)
    }

    /// Continue a run with the user's reply.
    ///
    /// A run that was awaiting the user picks up where it paused. Any
    /// other run starts a new turn on the same log with fresh limits.
    pub async fn resume(
        &self,
        state: &mut RunState,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> RunResult {
        if !state.status.is_awaiting_user() {
            state.iteration_count = 0;
            state.token_budget_used = 0;
        }
        state.pending = None;
        if let Err(e) = state.push(Message::user(user_text)) {
            return self.finish(
                state,
                Outcome::Stopped {
                    status: RunStatus::Failed,
                    reason: StopReason::Internal(e.to_string()),
                    text: None,
                },
                0,
            );
        }
        self.drive(state, cancel).await
    }

    /// Drive `state` until it completes, fails, aborts or pauses on the user.
    pub async fn drive(&self, state: &mut RunState, cancel: &CancellationToken) -> RunResult {
        let token = cancel.child_token();
        let deadline = self.policy.deadline.map(|d| Instant::now() + d);
        let _watchdog = deadline.map(|at| DeadlineGuard::arm(at, token.clone()));
        let mut ctx = RunCtx {
            run_id: Uuid::new_v4().to_string(),
            token,
            deadline,
            model_calls: 0,
        };

        let preview: String = state
            .messages
            .last_user_text()
            .unwrap_or_default()
            .chars()
            .take(80)
            .collect();
        info!(run_id = %ctx.run_id, messages = state.messages.len(), "Run started");
        self.event_bus.publish(DomainEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            user_preview: preview,
            timestamp: Utc::now(),
        });

        state.status = RunStatus::Running;
        state.pending = None;

        let mut step = Step::CallModel;
        let outcome = loop {
            step = match step {
                Step::CallModel => self.call_model(state, &mut ctx).await,
                Step::Dispatch(calls) => self.dispatch(state, &ctx, calls).await,
                Step::ForceFinal(reason) => self.force_final(state, &mut ctx, reason).await,
                Step::Finish(outcome) => break outcome,
            };
        };

        let result = self.finish(state, outcome, ctx.model_calls);
        info!(
            run_id = %ctx.run_id,
            status = %result.status,
            iterations = result.iterations,
            model_calls = result.model_calls,
            "Run finished"
        );
        self.event_bus.publish(DomainEvent::RunFinished {
            run_id: ctx.run_id,
            status: result.status,
            iterations: result.iterations,
            timestamp: Utc::now(),
        });

        if result.status == RunStatus::Completed {
            self.extract_facts(state, &result.text, &ctx.token).await;
        }
        result
    }

    async fn call_model(&self, state: &mut RunState, ctx: &mut RunCtx) -> Step {
        if let Some(reason) = ctx.interruption() {
            return stopped(RunStatus::Aborted, reason);
        }
        if state.iteration_count >= self.policy.max_iterations {
            return Step::ForceFinal(StopReason::IterationLimitExceeded);
        }
        if state.token_budget_used >= self.policy.max_tokens {
            return Step::ForceFinal(StopReason::TokenBudgetExceeded);
        }

        let schemas = self.offered_schemas(state);
        let window = match self.context.prepare(state, &schemas, false, &ctx.token).await {
            Ok(window) => window,
            Err(ContextError::Cancelled) => {
                let interrupt = ctx.interruption().unwrap_or(StopReason::Cancelled);
                return stopped(RunStatus::Aborted, interrupt);
            }
            Err(e) => {
                warn!(run_id = %ctx.run_id, error = %e, "Context does not fit with tools enabled");
                return Step::ForceFinal(StopReason::TokenBudgetExceeded);
            }
        };
        self.record_compaction(state, ctx, &window);

        debug!(
            run_id = %ctx.run_id,
            iteration = state.iteration_count + 1,
            messages = window.messages.len(),
            "Calling model"
        );
        let tokens_sent = window.tokens_after;
        let request = self.request(window.messages, schemas);
        let response = match self.complete_with_retry(request, ctx).await {
            Ok(response) => response,
            Err(CallError::Interrupted(reason)) => return stopped(RunStatus::Aborted, reason),
            Err(CallError::Gateway(e)) => {
                return stopped(RunStatus::Failed, StopReason::GatewayFailure(e.to_string()));
            }
        };
        self.record_call(state, ctx, &response, tokens_sent, false);

        let mut response = response;
        rekey_reused_call_ids(state, &mut response.message, &ctx.run_id);
        let reply = response.reply();
        if let Err(e) = state.push(response.message) {
            return stopped(RunStatus::Failed, StopReason::Internal(e.to_string()));
        }
        self.save_step(state);
        match reply {
            ModelReply::Final(text) => Step::Finish(Outcome::Completed(text)),
            ModelReply::ToolCalls { calls, .. } => {
                debug!(run_id = %ctx.run_id, count = calls.len(), "Model requested tools");
                Step::Dispatch(calls)
            }
        }
    }

    async fn dispatch(&self, state: &mut RunState, ctx: &RunCtx, calls: Vec<ToolCallRequest>) -> Step {
        let executed = self
            .executor
            .execute_batch(
                &calls,
                state.messages.messages(),
                self.policy.parallel_tool_calls,
                &ctx.token,
            )
            .await;
        state.iteration_count += 1;

        let mut pending = None;
        for ExecutedCall {
            call,
            outcome,
            duration,
        } in executed
        {
            self.event_bus.publish(DomainEvent::ToolExecuted {
                run_id: ctx.run_id.clone(),
                tool_name: call.tool_name.clone(),
                success: outcome.is_success(),
                duration_ms: duration.as_millis() as u64,
                timestamp: Utc::now(),
            });
            if let Err(e) = state.push(Message::tool_result(&call.id, outcome.to_message_text())) {
                return stopped(RunStatus::Failed, StopReason::Internal(e.to_string()));
            }
            if pending.is_some() {
                continue;
            }
            match outcome {
                ToolOutcome::NeedsConfirmation { action } => {
                    pending = Some(PendingInput::Confirmation {
                        tool_call_id: call.id,
                        tool_name: call.tool_name,
                        action,
                    });
                }
                ToolOutcome::Clarify(question) => {
                    pending = Some(PendingInput::Clarification {
                        tool_call_id: call.id,
                        question,
                    });
                }
                ToolOutcome::Ok(_) | ToolOutcome::Err(_) => {}
            }
        }

        self.save_step(state);

        if let Some(reason) = ctx.interruption() {
            return stopped(RunStatus::Aborted, reason);
        }
        match pending {
            Some(pending) => Step::Finish(Outcome::Paused(pending)),
            None => Step::CallModel,
        }
    }

    /// One last call with tools withdrawn, for a best-effort answer.
    async fn force_final(&self, state: &mut RunState, ctx: &mut RunCtx, reason: StopReason) -> Step {
        if let Some(interrupt) = ctx.interruption() {
            return stopped(RunStatus::Aborted, interrupt);
        }
        warn!(run_id = %ctx.run_id, %reason, "Forcing a final answer with tools disabled");

        let compress = reason == StopReason::TokenBudgetExceeded;
        let window = match self.context.prepare(state, &[], compress, &ctx.token).await {
            Ok(window) => window,
            Err(ContextError::Cancelled) => {
                let interrupt = ctx.interruption().unwrap_or(StopReason::Cancelled);
                return stopped(RunStatus::Aborted, interrupt);
            }
            Err(e) => {
                warn!(run_id = %ctx.run_id, error = %e, "Context does not fit for a final answer");
                return stopped(RunStatus::Aborted, reason);
            }
        };
        self.record_compaction(state, ctx, &window);

        let tokens_sent = window.tokens_after;
        let mut messages = window.messages;
        messages.push(Message::system(FINAL_ANSWER_NUDGE));
        let response = match self.complete_with_retry(self.request(messages, Vec::new()), ctx).await {
            Ok(response) => response,
            Err(CallError::Interrupted(interrupt)) => return stopped(RunStatus::Aborted, interrupt),
            Err(CallError::Gateway(e)) => {
                warn!(run_id = %ctx.run_id, error = %e, "Final answer call failed");
                return stopped(RunStatus::Aborted, reason);
            }
        };
        self.record_call(state, ctx, &response, tokens_sent, true);

        // Tool calls in a forced reply cannot be honoured; keep only the text.
        let text = response.message.text().trim().to_string();
        if !text.is_empty() {
            if let Err(e) = state.push(Message::assistant(text.clone())) {
                return stopped(RunStatus::Failed, StopReason::Internal(e.to_string()));
            }
            self.save_step(state);
        }
        Step::Finish(Outcome::Stopped {
            status: RunStatus::Aborted,
            reason,
            text: Some(text),
        })
    }

    /// Every tool, or with retrieval on the best matches for the latest
    /// user message. A message matching no tool gets every tool.
    fn offered_schemas(&self, state: &RunState) -> Vec<ToolSchema> {
        let tools = self.tools();
        let Some(k) = self.tool_top_k else {
            return tools.schemas();
        };
        let query = state.messages.last_user_text().unwrap_or_default();
        let found = tools.search(query, k);
        if found.is_empty() {
            return tools.schemas();
        }
        debug!(offered = found.len(), of = tools.len(), "Narrowed tools by retrieval");
        found.iter().map(ToolDefinition::schema).collect()
    }

    fn request(&self, messages: Vec<Message>, tools: Vec<ToolSchema>) -> GatewayRequest {
        GatewayRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_response_tokens,
            tools,
        }
    }

    /// Call the gateway, retrying transient failures with backoff.
    async fn complete_with_retry(
        &self,
        request: GatewayRequest,
        ctx: &RunCtx,
    ) -> Result<GatewayResponse, CallError> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = ctx.token.cancelled() => {
                    return Err(CallError::Interrupted(
                        ctx.interruption().unwrap_or(StopReason::Cancelled),
                    ));
                }
                result = self.gateway.complete(request.clone()) => result,
            };
            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt, &e);
                    attempt += 1;
                    warn!(
                        run_id = %ctx.run_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Gateway call failed, retrying"
                    );
                    tokio::select! {
                        _ = ctx.token.cancelled() => {
                            return Err(CallError::Interrupted(
                                ctx.interruption().unwrap_or(StopReason::Cancelled),
                            ));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(run_id = %ctx.run_id, attempts = attempt + 1, error = %e, "Gateway call failed");
                    return Err(CallError::Gateway(e));
                }
            }
        }
    }

    fn record_compaction(&self, state: &mut RunState, ctx: &RunCtx, window: &ContextWindow) {
        if let Some(usage) = window.summary_usage {
            state.token_budget_used += u64::from(usage.total_tokens);
        }
        if window.tier != CompactionTier::None {
            self.event_bus.publish(DomainEvent::ContextCompacted {
                run_id: ctx.run_id.clone(),
                tier: window.tier.as_str().to_string(),
                tokens_before: window.tokens_before,
                tokens_after: window.tokens_after,
                timestamp: Utc::now(),
            });
        }
    }

    fn record_call(
        &self,
        state: &mut RunState,
        ctx: &mut RunCtx,
        response: &GatewayResponse,
        tokens_sent: usize,
        forced_final: bool,
    ) {
        ctx.model_calls += 1;
        // Backends that omit usage are charged the heuristic estimate.
        let tokens = response.usage.map_or_else(
            || (tokens_sent + token::estimate_message_tokens(&response.message)) as u64,
            |u| u64::from(u.total_tokens),
        );
        state.token_budget_used += tokens;
        self.event_bus.publish(DomainEvent::ModelCalled {
            run_id: ctx.run_id.clone(),
            model: response.model.clone(),
            tokens_used: u32::try_from(tokens).unwrap_or(u32::MAX),
            tool_calls: response.message.tool_calls.len(),
            forced_final,
            timestamp: Utc::now(),
        });
    }

    fn finish(&self, state: &mut RunState, outcome: Outcome, model_calls: u32) -> RunResult {
        let (status, text, stop_reason, pending) = match outcome {
            Outcome::Completed(text) => (RunStatus::Completed, text, None, None),
            Outcome::Paused(pending) => {
                let status = match pending {
                    PendingInput::Confirmation { .. } => RunStatus::AwaitingConfirmation,
                    PendingInput::Clarification { .. } => RunStatus::AwaitingClarification,
                };
                (status, pending.prompt(), None, Some(pending))
            }
            Outcome::Stopped {
                status,
                reason,
                text,
            } => {
                let text = text
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| best_effort_text(state, &reason));
                (status, text, Some(reason), None)
            }
        };
        state.status = status;
        state.pending = pending.clone();
        RunResult {
            text,
            status,
            stop_reason,
            pending,
            iterations: state.iteration_count,
            model_calls,
        }
    }

    async fn recall_facts(&self, query: &str) -> Vec<agentloop_core::memory::MemoryFact> {
        let Some(store) = &self.facts else {
            return vec![];
        };
        if self.recall_limit == 0 {
            return vec![];
        }
        match store.retrieve(query, self.recall_limit).await {
            Ok(facts) => {
                if !facts.is_empty() {
                    debug!(count = facts.len(), "Recalled facts for context");
                }
                facts
            }
            Err(e) => {
                warn!("Fact recall failed: {e}");
                vec![]
            }
        }
    }

    fn save_step(&self, state: &RunState) {
        if let Some(hook) = &self.checkpoint {
            hook(state);
        }
    }

    /// Extract and store facts from the exchange that just completed.
    ///
    /// Abandoned without storing anything if `cancel` fires first.
    async fn extract_facts(&self, state: &RunState, answer: &str, cancel: &CancellationToken) {
        let Some(store) = &self.facts else {
            return;
        };
        if !self.auto_extract || answer.trim().is_empty() {
            return;
        }
        let Some(user_text) = state.messages.last_user_text() else {
            return;
        };

        let extraction = facts::extract_facts(self.gateway.as_ref(), &self.model, user_text, answer);
        let extracted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Fact extraction abandoned, run was interrupted");
                return;
            }
            extracted = extraction => extracted,
        };
        match extracted {
            Ok(extracted) => {
                let count = extracted.len();
                for fact in extracted {
                    let fact = match self.fact_ttl_secs {
                        Some(ttl) => fact.with_ttl(ttl),
                        None => fact,
                    };
                    if let Err(e) = store.store(fact).await {
                        warn!("Failed to store extracted fact: {e}");
                    }
                }
                debug!(count, "Extracted facts from completed run");
            }
            Err(e) => warn!("Fact extraction failed: {e}"),
        }
    }
}

/// Give fresh ids to calls whose id an earlier turn already used. Some
/// backends restart their numbering every response.
fn rekey_reused_call_ids(state: &RunState, message: &mut Message, run_id: &str) {
    let mut seen = std::collections::HashSet::new();
    for (i, call) in message.tool_calls.iter_mut().enumerate() {
        if state.messages.was_requested(&call.id) || !seen.insert(call.id.clone()) {
            let fresh = format!("{}_{}_{i}", call.id, &run_id[..8.min(run_id.len())]);
            debug!(old = %call.id, new = %fresh, "Re-keyed reused tool call id");
            call.id = fresh;
            seen.insert(call.id.clone());
        }
    }
}

fn stopped(status: RunStatus, reason: StopReason) -> Step {
    Step::Finish(Outcome::Stopped {
        status,
        reason,
        text: None,
    })
}

/// The latest assistant text of the current turn, or a note saying why
/// there is none.
fn best_effort_text(state: &RunState, reason: &StopReason) -> String {
    state
        .messages
        .messages()
        .iter()
        .rev()
        .take_while(|m| m.role != Role::User)
        .find(|m| m.role == Role::Assistant && !m.text().trim().is_empty())
        .map(|m| m.text().to_string())
        .unwrap_or_else(|| format!("The run stopped before producing an answer: {reason}."))
}
