//! Fact memory tools: let the agent explicitly remember and recall facts.
//!
//! These bridge the tool system with a `FactStore`, complementing the
//! automatic extraction that runs after a completed exchange.

use agentloop_core::error::ToolError;
use agentloop_core::memory::{FactStore, MemoryFact};
use agentloop_core::tool::{RiskLevel, Tool, ToolOutput};
use async_trait::async_trait;
use std::sync::Arc;

/// Stores a fact in long-term memory.
pub struct RememberFactTool {
    store: Arc<dyn FactStore>,
    default_ttl_secs: Option<u64>,
}

impl RememberFactTool {
    pub fn new(store: Arc<dyn FactStore>, default_ttl_secs: Option<u64>) -> Self {
        Self {
            store,
            default_ttl_secs,
        }
    }
}

#[async_trait]
impl Tool for RememberFactTool {
    fn name(&self) -> &str {
        "remember_fact"
    }

    fn description(&self) -> &str {
        "Save an important fact to long-term memory so it is available in future conversations."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "minLength": 1, "description": "Short stable identifier, e.g. prod_db_version" },
                "value": { "type": "string", "description": "The fact to remember" },
                "importance": { "type": "integer", "minimum": 1, "maximum": 10, "default": 5 }
            },
            "required": ["key", "value"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let key = arguments["key"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'key' argument".into()))?;
        let value = arguments["value"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'value' argument".into()))?;
        let importance = arguments["importance"].as_u64().unwrap_or(5).min(10) as u8;

        let mut fact = MemoryFact::new(key, value, importance);
        fact.ttl_secs = self.default_ttl_secs;

        self.store
            .store(fact)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;
        Ok(format!("Remembered {key}.").into())
    }
}

/// Looks up facts in long-term memory.
pub struct RecallFactsTool {
    store: Arc<dyn FactStore>,
}

impl RecallFactsTool {
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for RecallFactsTool {
    fn name(&self) -> &str {
        "recall_facts"
    }

    fn description(&self) -> &str {
        "Search long-term memory for facts relevant to a query, most important first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1, "default": 5 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let limit = arguments["limit"].as_u64().unwrap_or(5) as usize;

        let facts = self
            .store
            .retrieve(query, limit)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        if facts.is_empty() {
            return Ok("No matching facts found.".into());
        }
        let lines: Vec<String> = facts
            .iter()
            .map(|f| format!("- {}: {} (importance {})", f.key, f.value, f.importance))
            .collect();
        Ok(lines.join("\n").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloop_memory::InMemoryFactStore;

    #[tokio::test]
    async fn remember_then_recall() {
        let store: Arc<dyn FactStore> = Arc::new(InMemoryFactStore::new());
        let remember = RememberFactTool::new(store.clone(), None);
        let recall = RecallFactsTool::new(store.clone());

        remember
            .execute(serde_json::json!({"key": "prod_db", "value": "prod runs PostgreSQL 15.2", "importance": 9}))
            .await
            .unwrap();

        let out = recall
            .execute(serde_json::json!({"query": "postgresql"}))
            .await
            .unwrap();
        assert_eq!(
            out,
            ToolOutput::Text("- prod_db: prod runs PostgreSQL 15.2 (importance 9)".into())
        );
    }

    #[tokio::test]
    async fn recall_with_no_match() {
        let store: Arc<dyn FactStore> = Arc::new(InMemoryFactStore::new());
        let out = RecallFactsTool::new(store)
            .execute(serde_json::json!({"query": "kubernetes"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::Text("No matching facts found.".into()));
    }

    #[tokio::test]
    async fn remember_applies_default_ttl() {
        let store: Arc<dyn FactStore> = Arc::new(InMemoryFactStore::new());
        RememberFactTool::new(store.clone(), Some(3600))
            .execute(serde_json::json!({"key": "oncall", "value": "dana"}))
            .await
            .unwrap();
        let fact = store.get("oncall").await.unwrap().unwrap();
        assert_eq!(fact.ttl_secs, Some(3600));
        assert_eq!(fact.importance, 5);
    }
}
