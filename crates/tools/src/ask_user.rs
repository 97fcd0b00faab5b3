//! Clarification tool: lets the model pause the run and ask the user a
//! question instead of guessing.

use agentloop_core::error::ToolError;
use agentloop_core::tool::{Tool, ToolOutput};
use async_trait::async_trait;

pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a clarifying question when the request is ambiguous. \
         The run pauses until the user answers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "minLength": 1 }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let question = arguments["question"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'question' argument".into()))?;
        Ok(ToolOutput::Clarify(question.trim().to_string()))
    }
}
