//! Outbound email tool. Sending is visible to others, so every call needs
//! confirmation even though the risk level is only medium.

use agentloop_core::error::ToolError;
use agentloop_core::tool::{RiskLevel, Tool, ToolOutput};
use async_trait::async_trait;

pub struct SendEmailTool;

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send an email to a recipient."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "to": { "type": "string", "description": "Recipient address" },
                "subject": { "type": "string" },
                "body": { "type": "string" }
            },
            "required": ["to", "subject", "body"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let field = |name: &str| {
            arguments[name]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{name}' argument")))
        };
        let to = field("to")?;
        let subject = field("subject")?;
        let body = field("body")?;

        if !to.contains('@') {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("'{to}' is not an email address"),
            });
        }

        Ok(format!(
            "Email sent to {to}. Subject: {subject}. Body len: {}",
            body.len()
        )
        .into())
    }
}
