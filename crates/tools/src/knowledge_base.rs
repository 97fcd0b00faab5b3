//! Runbook lookup: policies and procedures the agent should consult
//! before acting.

use agentloop_core::error::ToolError;
use agentloop_core::tool::{Tool, ToolOutput};
use async_trait::async_trait;

/// `(document, content)` pairs, kept in name order so results are stable.
const DOCUMENTS: &[(&str, &str)] = &[
    (
        "backup_guide.txt",
        "To back up a database, run the backup procedure first and wait for it to report \
         success. Backups take no arguments.",
    ),
    (
        "deletion_policy.txt",
        "POLICY #7: Databases are deleted only after a backup and with written approval \
         from the owning team.",
    ),
    (
        "phoenix_restart.txt",
        "Phoenix server restart protocol: 1) Stop the load balancer 2) Back up the database \
         3) Restart Phoenix 4) Start the load balancer",
    ),
    (
        "restart_policy.txt",
        "POLICY #12: Before restarting any server, you MUST back up its database. Failure to \
         do so is a violation.",
    ),
];

const NO_MATCH: &str = "No documents found matching your query.";

pub struct SearchKnowledgeBaseTool;

impl SearchKnowledgeBaseTool {
    /// Documents whose name or content holds every word of `query`.
    fn search(query: &str) -> Vec<(&'static str, &'static str)> {
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if words.is_empty() {
            return Vec::new();
        }
        DOCUMENTS
            .iter()
            .filter(|(name, content)| {
                let haystack = format!("{name} {content}").to_lowercase();
                words.iter().all(|w| haystack.contains(w.as_str()))
            })
            .copied()
            .collect()
    }
}

#[async_trait]
impl Tool for SearchKnowledgeBaseTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for policies, guides and procedures. Use this before \
         any action that might have a policy or procedure, such as a restart."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Search words, e.g. 'restart' or 'phoenix'"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let found = Self::search(query);
        if found.is_empty() {
            return Ok(NO_MATCH.into());
        }
        let text = found
            .iter()
            .map(|(name, content)| format!("File: {name}\nContent: {content}"))
            .collect::<Vec<_>>()
            .join("\n---\n");
        Ok(text.into())
    }
}
