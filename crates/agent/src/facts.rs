//! Fact recall and extraction around a run.
//!
//! Recall formats stored facts into a block appended to the system prompt
//! at run start. Extraction asks the model to pull durable facts out of a
//! finished exchange.

use agentloop_core::error::GatewayError;
use agentloop_core::gateway::{GatewayRequest, ModelGateway};
use agentloop_core::memory::{MAX_IMPORTANCE, MIN_IMPORTANCE, MemoryFact};
use agentloop_core::message::Message;
use serde::Deserialize;
use tracing::debug;

const EXTRACTION_PROMPT: &str = "Extract durable facts worth remembering from the exchange below: \
infrastructure details, user preferences and decisions. Reply with a JSON array only, each item \
shaped {\"key\": \"short_snake_case_id\", \"value\": \"the fact\", \"importance\": 1-10}. Reply \
with [] when nothing is worth keeping.";

/// Format recalled facts into a context block for the system prompt.
pub fn format_fact_context(facts: &[MemoryFact]) -> String {
    if facts.is_empty() {
        return String::new();
    }

    let mut ctx = String::from("\n\n## Known Facts\n");
    for fact in facts {
        ctx.push_str(&format!(
            "- {}: {} (importance {})\n",
            fact.key, fact.value, fact.importance
        ));
    }
    ctx
}

#[derive(Deserialize)]
struct RawFact {
    key: String,
    value: serde_json::Value,
    #[serde(default)]
    importance: Option<i64>,
}

/// Parse the model's extraction reply into facts.
///
/// Tolerates prose or code fences around the array. Importance is clamped
/// into range and items without a key are skipped.
pub fn parse_facts(reply: &str) -> Vec<MemoryFact> {
    let (Some(open), Some(close)) = (reply.find('['), reply.rfind(']')) else {
        return Vec::new();
    };
    if close < open {
        return Vec::new();
    }
    let raw: Vec<RawFact> = match serde_json::from_str(&reply[open..=close]) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "Fact extraction reply was not a JSON array of facts");
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter(|f| !f.key.trim().is_empty())
        .map(|f| {
            let value = match f.value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            let importance = f
                .importance
                .unwrap_or(5)
                .clamp(i64::from(MIN_IMPORTANCE), i64::from(MAX_IMPORTANCE)) as u8;
            MemoryFact::new(f.key.trim(), value, importance)
        })
        .collect()
}

/// Ask the model for facts in one user/assistant exchange.
pub async fn extract_facts(
    gateway: &dyn ModelGateway,
    model: &str,
    user_text: &str,
    answer: &str,
) -> Result<Vec<MemoryFact>, GatewayError> {
    let request = GatewayRequest {
        model: model.to_string(),
        messages: vec![
            Message::system(EXTRACTION_PROMPT),
            Message::user(format!("User: {user_text}\nAssistant: {answer}")),
        ],
        temperature: 0.0,
        max_tokens: Some(512),
        tools: Vec::new(),
    };
    let response = gateway.complete(request).await?;
    Ok(parse_facts(response.message.text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedGateway, make_text_response};

    #[test]
    fn empty_facts_produce_no_block() {
        assert_eq!(format_fact_context(&[]), "");
    }

    #[test]
    fn fact_block_lists_each_fact() {
        let facts = vec![
            MemoryFact::new("prod_db", "PostgreSQL 15.2", 8),
            MemoryFact::new("oncall", "alice", 4),
        ];
        let ctx = format_fact_context(&facts);
        assert!(ctx.contains("## Known Facts"));
        assert!(ctx.contains("- prod_db: PostgreSQL 15.2 (importance 8)"));
        assert!(ctx.contains("- oncall: alice"));
    }

    #[test]
    fn parse_clamps_importance_and_skips_blank_keys() {
        let reply = r#"Here you go:
```json
[{"key": "prod_db", "value": "PostgreSQL 15.2", "importance": 42},
 {"key": "", "value": "nothing"},
 {"key": "replicas", "value": 3, "importance": -1},
 {"key": "region", "value": "eu-west-1"}]
```"#;
        let facts = parse_facts(reply);
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0].importance, 10);
        assert_eq!(facts[1].value, "3");
        assert_eq!(facts[1].importance, 1);
        assert_eq!(facts[2].importance, 5);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_facts("no facts here").is_empty());
        assert!(parse_facts("] backwards [").is_empty());
        assert!(parse_facts("[not json]").is_empty());
    }

    #[tokio::test]
    async fn extraction_uses_a_tool_free_call() {
        let gateway = ScriptedGateway::replies(vec![make_text_response(
            r#"[{"key":"prod_db","value":"PostgreSQL 15.2","importance":7}]"#,
        )]);
        let facts = extract_facts(&gateway, "mock-model", "what runs prod?", "PostgreSQL 15.2")
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].key, "prod_db");
        let requests = gateway.requests();
        let request = &requests[0];
        assert!(request.tools.is_empty());
        assert!(request.messages[1].text().contains("what runs prod?"));
    }
}
