//! Database deletion tool.
//!
//! Irreversible, so it is registered as high risk and the executor will
//! only run it after the user confirms the exact call.

use agentloop_core::error::ToolError;
use agentloop_core::tool::{RiskLevel, Tool, ToolOutput};
use async_trait::async_trait;

pub struct DeleteDatabaseTool;

#[async_trait]
impl Tool for DeleteDatabaseTool {
    fn name(&self) -> &str {
        "delete_database"
    }

    fn description(&self) -> &str {
        "Permanently delete a database by name. This cannot be undone."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "minLength": 1, "description": "Database name" }
            },
            "required": ["name"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::High
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let name = arguments["name"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'name' argument".into()))?;
        tracing::warn!(database = name, "Deleting database");
        Ok(format!("Database '{name}' has been DELETED.").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_high_risk() {
        let def = DeleteDatabaseTool.to_definition();
        assert_eq!(def.risk_level, RiskLevel::High);
        assert!(def.needs_confirmation());
    }

    #[tokio::test]
    async fn deletes_named_database() {
        let out = DeleteDatabaseTool
            .execute(serde_json::json!({"name": "staging"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::Text("Database 'staging' has been DELETED.".into()));
    }
}
