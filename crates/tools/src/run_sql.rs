//! Read-only SQL tool for the database specialist.

use agentloop_core::error::ToolError;
use agentloop_core::tool::{RiskLevel, Tool, ToolOutput};
use async_trait::async_trait;

pub struct RunSqlTool;

#[async_trait]
impl Tool for RunSqlTool {
    fn name(&self) -> &str {
        "run_sql"
    }

    fn description(&self) -> &str {
        "Run a SQL query against the primary database and return the result."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The SQL statement to run" }
            },
            "required": ["query"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?
            .trim();

        let normalized = query.trim_end_matches(';').to_lowercase();
        if normalized.starts_with("drop ") || normalized.starts_with("truncate ") {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: "destructive statements are not allowed; use delete_database".into(),
            });
        }

        if normalized == "select version()" {
            return Ok("PostgreSQL 15.2".into());
        }
        Ok("Query executed successfully.".into())
    }
}
