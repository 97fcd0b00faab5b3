//! Network reachability tool for the network specialist.

use agentloop_core::error::ToolError;
use agentloop_core::tool::{Tool, ToolOutput};
use async_trait::async_trait;

pub struct PingTool;

#[async_trait]
impl Tool for PingTool {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Check network reachability and latency of a host."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "host": { "type": "string", "description": "Hostname or IP address" }
            },
            "required": ["host"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let host = arguments["host"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'host' argument".into()))?;
        Ok(format!("Host {host} is reachable. Latency: 5ms").into())
    }
}
