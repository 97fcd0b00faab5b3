//! Delegation to specialist sub-agents.
//!
//! ```text
//! parent run ──tool call {question}──▶ nested run [role prompt, question]
//!     ▲                                      │
//!     └────── Tool message (final text) ◀────┘
//! ```
//!
//! A nested run starts from its role prompt and the question only. It never
//! sees the parent's history, runs the full controller under its own limits
//! and hands back nothing but its final text.

use crate::loop_runner::AgentLoop;
use agentloop_core::error::ToolError;
use agentloop_core::run::{RunResult, RunStatus};
use agentloop_core::tool::{Tool, ToolOutput, ToolRegistry};
use async_trait::async_trait;
use tracing::info;

/// Run `question` through a specialist with its own prompt and tools.
pub async fn delegate(
    parent: &AgentLoop,
    question: &str,
    role_prompt: &str,
    tools: ToolRegistry,
    max_iterations: u32,
) -> RunResult {
    let specialist = parent.subagent(role_prompt, tools, max_iterations);
    specialist.run(question).await
}

/// Exposes a specialist to the parent model as a tool.
pub struct DelegateTool {
    name: String,
    description: String,
    specialist: AgentLoop,
}

impl DelegateTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, specialist: AgentLoop) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            specialist,
        }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "minLength": 1,
                    "description": "A self-contained question; the specialist sees nothing else"
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let question = arguments["question"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'question' argument".into()))?;

        info!(specialist = %self.name, "Delegating question");
        let result = self.specialist.run(question).await;
        match result.status {
            RunStatus::Completed | RunStatus::Aborted => Ok(result.text.into()),
            // The specialist cannot reach the user, so its question becomes
            // the parent's observation.
            RunStatus::AwaitingConfirmation | RunStatus::AwaitingClarification => Ok(format!(
                "The {} specialist stopped to ask: {}",
                self.name, result.text
            )
            .into()),
            RunStatus::Failed | RunStatus::Running => Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: result.text,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        ScriptedGateway, make_text_response, make_tool_call, make_tool_call_response,
    };
    use agentloop_core::gateway::ModelGateway;
    use agentloop_core::message::Role;
    use agentloop_tools::default_registry;
    use serde_json::json;
    use std::sync::Arc;

    const DBA_PROMPT: &str = "You are a database specialist. Answer with facts only.";

    #[tokio::test]
    async fn nested_run_sees_only_role_prompt_and_question() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![
            // parent
            make_tool_call_response(vec![make_tool_call(
                "p1",
                "ask_dba",
                json!({"question": "Which PostgreSQL version runs prod?"}),
            )]),
            // specialist
            make_text_response("PostgreSQL 15.2"),
            // parent
            make_text_response("Prod runs PostgreSQL 15.2."),
        ]));
        let shared: Arc<dyn ModelGateway> = gateway.clone();
        let base = AgentLoop::new(shared.clone(), "mock-model", default_registry().unwrap());
        let dba_tools = base.tools().subset(&["run_sql"]).unwrap();
        let mut registry = default_registry().unwrap();
        registry
            .register(Arc::new(DelegateTool::new(
                "ask_dba",
                "Ask the database specialist",
                base.subagent(DBA_PROMPT, dba_tools, 5),
            )))
            .unwrap();
        let parent = AgentLoop::new(shared, "mock-model", registry).with_system_prompt("parent prompt");

        let result = parent.run("What database version is prod on?").await;
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.text, "Prod runs PostgreSQL 15.2.");

        let requests = gateway.requests();
        let nested = &requests[1];
        assert_eq!(nested.messages.len(), 2);
        assert_eq!(nested.messages[0].role, Role::System);
        assert_eq!(nested.messages[0].text(), DBA_PROMPT);
        assert_eq!(nested.messages[1].text(), "Which PostgreSQL version runs prod?");
        let nested_tools: Vec<&str> = nested.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(nested_tools, vec!["run_sql"]);

        let back = &requests[2];
        let tool_msg = back.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.text(), "PostgreSQL 15.2");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn delegate_runs_specialist_tools() {
        let gateway = Arc::new(ScriptedGateway::replies(vec![
            make_tool_call_response(vec![make_tool_call(
                "s1",
                "run_sql",
                json!({"query": "SELECT version();"}),
            )]),
            make_text_response("The server reports PostgreSQL 15.2."),
        ]));
        let parent = AgentLoop::new(gateway.clone(), "mock-model", default_registry().unwrap());
        let tools = parent.tools().subset(&["run_sql"]).unwrap();

        let result = delegate(&parent, "What version?", DBA_PROMPT, tools, 3).await;
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.text, "The server reports PostgreSQL 15.2.");
        assert_eq!(gateway.call_count(), 2);
    }

    #[tokio::test]
    async fn failed_specialist_is_a_tool_error() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Err(
            agentloop_core::error::GatewayError::AuthenticationFailed("bad key".into()),
        )]));
        let base = AgentLoop::new(gateway, "mock-model", ToolRegistry::new());
        let tool = DelegateTool::new("ask_dba", "dba", base.subagent(DBA_PROMPT, ToolRegistry::new(), 2));

        let err = tool.execute(json!({"question": "hi"})).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
