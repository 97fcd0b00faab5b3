//! Shared test helpers for agent tests.

use agentloop_core::error::{GatewayError, ToolError};
use agentloop_core::gateway::{GatewayRequest, GatewayResponse, ModelGateway, Usage};
use agentloop_core::message::{Message, ToolCallRequest};
use agentloop_core::tool::{Tool, ToolOutput};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A mock gateway that returns a sequence of scripted responses.
///
/// Each call to `complete` pops the next entry. Running past the end of
/// the script is reported as a non-retryable error so the run fails
/// loudly instead of hanging.
pub struct ScriptedGateway {
    responses: Mutex<VecDeque<Result<GatewayResponse, GatewayError>>>,
    requests: Mutex<Vec<GatewayRequest>>,
}

impl ScriptedGateway {
    pub fn new(responses: Vec<Result<GatewayResponse, GatewayError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A script where every call succeeds.
    pub fn replies(responses: Vec<GatewayResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::NotConfigured("script exhausted".into())))
    }
}

/// A gateway that requests `ping` whenever tools are offered and answers
/// in text once they are withdrawn.
pub struct AlwaysCallsTools {
    calls: AtomicUsize,
}

impl AlwaysCallsTools {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for AlwaysCallsTools {
    fn name(&self) -> &str {
        "always_calls_tools"
    }

    async fn complete(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if request.tools.is_empty() {
            return Ok(make_text_response("Partial answer: hosts checked so far look fine."));
        }
        Ok(make_tool_call_response(vec![ToolCallRequest::new(
            format!("call_{n}"),
            "ping",
            r#"{"host":"db1"}"#,
        )]))
    }
}

/// A gateway whose tool-free requests (summaries, fact extraction) hang
/// for an hour. Requests offering tools get a `ping` call, or a plain
/// answer when built with `answers_directly`.
pub struct StallingGateway {
    calls: AtomicUsize,
    stalled: AtomicUsize,
    answers_directly: bool,
}

impl StallingGateway {
    pub fn calls_tools() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            stalled: AtomicUsize::new(0),
            answers_directly: false,
        }
    }

    pub fn answers_directly() -> Self {
        Self {
            answers_directly: true,
            ..Self::calls_tools()
        }
    }

    /// How many tool-free requests have started.
    pub fn stalled_count(&self) -> usize {
        self.stalled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for StallingGateway {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn complete(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if request.tools.is_empty() {
            self.stalled.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Ok(make_text_response("[]"));
        }
        if self.answers_directly {
            return Ok(make_text_response("Prod runs PostgreSQL 15.2."));
        }
        Ok(make_tool_call_response(vec![ToolCallRequest::new(
            format!("call_{n}"),
            "ping",
            r#"{"host":"db1"}"#,
        )]))
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> GatewayResponse {
    GatewayResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response that requests tool calls.
pub fn make_tool_call_response(tool_calls: Vec<ToolCallRequest>) -> GatewayResponse {
    GatewayResponse {
        message: Message::assistant_tool_calls(None, tool_calls),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, args.to_string())
}

/// A tool that sleeps before answering, for timeout and cancellation tests.
pub struct SlowTool {
    pub delay: Duration,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps, then answers"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok("done".into())
    }
}

/// A tool whose implementation panics.
pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "explode"
    }

    fn description(&self) -> &str {
        "Always panics"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        panic!("index out of bounds");
    }
}
