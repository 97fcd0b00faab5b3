//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token.
//! Close enough for BPE tokenizers on English text, and deterministic,
//! which keeps compaction decisions reproducible in tests.

use agentloop_core::message::Message;
use agentloop_core::tool::ToolSchema;

/// Per-message cost of role names, delimiters and formatting markers.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
///
/// Tool-call requests count their name and raw argument string.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.tool_name) + estimate_tokens(&c.arguments))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(message.text()) + calls
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimate tokens for a tool schema (serialized as JSON).
pub fn estimate_schema_tokens(schema: &ToolSchema) -> usize {
    let json = serde_json::to_string(schema).unwrap_or_default();
    estimate_tokens(&json)
}

/// Estimate tokens for a slice of tool schemas.
pub fn estimate_schemas_tokens(schemas: &[ToolSchema]) -> usize {
    schemas.iter().map(estimate_schema_tokens).sum()
}
