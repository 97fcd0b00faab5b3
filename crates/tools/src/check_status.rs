//! Service health check tool.

use agentloop_core::error::ToolError;
use agentloop_core::tool::{Tool, ToolOutput};
use async_trait::async_trait;

/// Services reported as running; anything else is reported down.
const RUNNING_SERVICES: &[&str] = &["nginx", "postgres", "redis", "api-gateway"];

pub struct CheckStatusTool;

#[async_trait]
impl Tool for CheckStatusTool {
    fn name(&self) -> &str {
        "check_status"
    }

    fn description(&self) -> &str {
        "Check whether a named service is running."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "service": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Service name, e.g. nginx or postgres"
                }
            },
            "required": ["service"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let service = arguments["service"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'service' argument".into()))?
            .trim()
            .to_lowercase();

        let state = if RUNNING_SERVICES.contains(&service.as_str()) {
            "running"
        } else {
            "down"
        };
        Ok(format!("{service}: {state}").into())
    }
}
