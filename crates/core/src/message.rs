//! Message and message-store domain types.
//!
//! These are the core value objects that flow through a run:
//! user text → Message Store → controller → gateway → tool results → final text.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (role prompt, digests)
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

/// A model-emitted request to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique call ID (matches the backend's tool_call.id)
    pub id: String,

    /// Name of the tool to invoke
    pub tool_name: String,

    /// Raw JSON arguments exactly as the model produced them
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content (assistant tool-call turns may carry none)
    #[serde(default)]
    pub content: Option<String>,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (gateway info, compaction markers, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn base(role: Role, content: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, Some(content.into()))
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, Some(content.into()))
    }

    /// Create a new assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, Some(content.into()))
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        let mut msg = Self::base(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::base(Role::Tool, Some(content.into()));
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// The text content, or `""` when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Whether this is an assistant turn that requests tools.
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// Ordered, append-only log of a run's messages.
///
/// Appends are validated so that every `Tool` message answers a request
/// made by a strictly earlier `Assistant` message, and answers it once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Message>", into = "Vec<Message>")]
pub struct MessageStore {
    messages: Vec<Message>,
    requested: HashSet<String>,
    answered: HashSet<String>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a message list, re-checking causal order.
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for message in messages {
            store.append(message)?;
        }
        Ok(store)
    }

    /// Append a message, enforcing causal order for tool results.
    pub fn append(&mut self, message: Message) -> Result<(), StoreError> {
        if message.role == Role::Tool {
            let id = message
                .tool_call_id
                .as_ref()
                .ok_or(StoreError::MissingToolCallId)?;
            if !self.requested.contains(id) {
                return Err(StoreError::UnknownToolCallId(id.clone()));
            }
            if self.answered.contains(id) {
                return Err(StoreError::DuplicateToolResult(id.clone()));
            }
            self.answered.insert(id.clone());
        }
        for call in &message.tool_calls {
            self.requested.insert(call.id.clone());
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The leading system message, if the log starts with one.
    pub fn system(&self) -> Option<&Message> {
        self.messages.first().filter(|m| m.role == Role::System)
    }

    /// Whether a tool call with this id is already in the log.
    pub fn was_requested(&self, id: &str) -> bool {
        self.requested.contains(id)
    }

    /// Tool calls that have been requested but not yet answered.
    pub fn unanswered_calls(&self) -> Vec<&ToolCallRequest> {
        self.messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .filter(|c| !self.answered.contains(&c.id))
            .collect()
    }

    /// Text of the most recent user message.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
    }
}

impl TryFrom<Vec<Message>> for MessageStore {
    type Error = StoreError;

    fn try_from(messages: Vec<Message>) -> Result<Self, Self::Error> {
        Self::from_messages(messages)
    }
}

impl From<MessageStore> for Vec<Message> {
    fn from(store: MessageStore) -> Self {
        store.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "get_server_status", r#"{"ip":"192.168.1.10"}"#)
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_message_may_have_no_content() {
        let msg = Message::assistant_tool_calls(None, vec![call("c1")]);
        assert!(msg.content.is_none());
        assert_eq!(msg.text(), "");
        assert!(msg.has_tool_calls());
    }

    #[test]
    fn store_accepts_causal_tool_result() {
        let mut store = MessageStore::new();
        store.append(Message::user("check it")).unwrap();
        store.append(Message::assistant_tool_calls(None, vec![call("c1")])).unwrap();
        store.append(Message::tool_result("c1", "ONLINE")).unwrap();
        assert_eq!(store.len(), 3);
        assert!(store.unanswered_calls().is_empty());
    }

    #[test]
    fn store_rejects_orphan_tool_result() {
        let mut store = MessageStore::new();
        store.append(Message::user("check it")).unwrap();
        let err = store.append(Message::tool_result("c9", "ONLINE")).unwrap_err();
        assert_eq!(err, StoreError::UnknownToolCallId("c9".into()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_rejects_second_result_for_same_call() {
        let mut store = MessageStore::new();
        store.append(Message::assistant_tool_calls(None, vec![call("c1")])).unwrap();
        store.append(Message::tool_result("c1", "ONLINE")).unwrap();
        let err = store.append(Message::tool_result("c1", "OFFLINE")).unwrap_err();
        assert_eq!(err, StoreError::DuplicateToolResult("c1".into()));
    }

    #[test]
    fn store_remembers_requested_ids() {
        let mut store = MessageStore::new();
        assert!(!store.was_requested("c1"));
        store.append(Message::assistant_tool_calls(None, vec![call("c1")])).unwrap();
        assert!(store.was_requested("c1"));
        assert!(!store.was_requested("c2"));
    }

    #[test]
    fn store_rejects_tool_message_without_id() {
        let mut store = MessageStore::new();
        let mut msg = Message::tool_result("c1", "x");
        msg.tool_call_id = None;
        assert_eq!(store.append(msg).unwrap_err(), StoreError::MissingToolCallId);
    }

    #[test]
    fn deserialization_revalidates_order() {
        let orphan = vec![Message::user("hi"), Message::tool_result("nope", "x")];
        let json = serde_json::to_string(&orphan).unwrap();
        assert!(serde_json::from_str::<MessageStore>(&json).is_err());

        let mut store = MessageStore::new();
        store.append(Message::system("be brief")).unwrap();
        store.append(Message::assistant_tool_calls(None, vec![call("c1")])).unwrap();
        let json = serde_json::to_string(&store).unwrap();
        let restored: MessageStore = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.unanswered_calls().len(), 1);
        assert_eq!(restored.system().unwrap().text(), "be brief");
    }
}
