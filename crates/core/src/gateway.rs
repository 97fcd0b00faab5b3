//! Model gateway trait: the abstraction over completion backends.
//!
//! A gateway sends the ordered message history and tool schemas to a
//! completion endpoint and returns the model's next message: either final
//! text or a batch of tool-call requests.
//!
//! Implementations: OpenAI-compatible HTTP endpoints, scripted mocks in tests.

use crate::error::GatewayError;
use crate::message::{Message, ToolCallRequest};
use crate::tool::ToolSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single request to a completion backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call; empty means tools are disabled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete response from a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// The generated assistant message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// What the model decided to do this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// Final text; an absent or empty content is an empty answer
    Final(String),
    /// One or more tool invocations, with any accompanying text
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
}

impl GatewayResponse {
    /// Classify the message as a final answer or a tool-call batch.
    pub fn reply(&self) -> ModelReply {
        if self.message.tool_calls.is_empty() {
            ModelReply::Final(self.message.text().to_string())
        } else {
            ModelReply::ToolCalls {
                content: self.message.content.clone(),
                calls: self.message.tool_calls.clone(),
            }
        }
    }
}

/// The core gateway trait.
///
/// The controller calls `complete()` without knowing which backend is
/// behind it. Transport failures come back as `GatewayError` so the
/// caller can decide whether to retry.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// A human-readable name (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError>;

    /// Health check. Can we reach the backend?
    async fn health_check(&self) -> Result<bool, GatewayError> {
        Ok(true)
    }
}
