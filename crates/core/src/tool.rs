//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world.
//! Each tool is a polymorphic `{name, schema, execute}` object; the
//! registry looks tools up by name and never by concrete type.

use crate::error::ToolError;
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// How dangerous a tool invocation is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or otherwise harmless
    #[default]
    Low,
    /// Changes state but is recoverable
    Medium,
    /// Destructive or irreversible; always gated on confirmation
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// The part of a tool definition the model sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Full registration record for a tool, including risk metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameter_schema: serde_json::Value,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub requires_confirmation: bool,
    pub version: String,
}

impl ToolDefinition {
    /// Strip risk metadata for sending to the model.
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameter_schema.clone(),
        }
    }

    /// Whether invocations must be confirmed by the user first.
    pub fn needs_confirmation(&self) -> bool {
        self.risk_level == RiskLevel::High || self.requires_confirmation
    }
}

/// What a successful tool invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    /// A plain result string, fed back to the model
    Text(String),
    /// The tool needs an answer from the user before the run can go on
    Clarify(String),
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// The core Tool trait.
///
/// Implementations return their failures as `ToolError`; the executor
/// turns both outcomes into tool-result messages.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_server_status").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Low
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    fn version(&self) -> &str {
        "1.0"
    }

    /// Execute the tool with already-validated arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;

    /// Build the registration record for this tool.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameter_schema: self.parameters_schema(),
            risk_level: self.risk_level(),
            requires_confirmation: self.requires_confirmation(),
            version: self.version().to_string(),
        }
    }
}

#[derive(Clone)]
struct RegisteredTool {
    tool: Arc<dyn Tool>,
    definition: ToolDefinition,
    validator: Arc<JSONSchema>,
}

/// A registry of available tools.
///
/// Read-only once a run starts; cloning is cheap and clones may be shared
/// across concurrent runs.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique and the parameter schema must compile.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let definition = tool.to_definition();
        if self.tools.contains_key(&definition.name) {
            return Err(ToolError::DuplicateName(definition.name));
        }
        let validator = JSONSchema::compile(&definition.parameter_schema).map_err(|e| {
            ToolError::InvalidSchema {
                tool_name: definition.name.clone(),
                reason: e.to_string(),
            }
        })?;
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                tool,
                definition,
                validator: Arc::new(validator),
            },
        );
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: impl Tool + 'static) -> Result<Self, ToolError> {
        self.register(Arc::new(tool))?;
        Ok(self)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.tool.clone())
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All definitions, sorted by name so requests are deterministic.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Model-facing schemas, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.definitions().iter().map(ToolDefinition::schema).collect()
    }

    /// The `k` definitions that best match `query` by keyword, best first.
    ///
    /// A query word found in a tool's name outweighs one found only in its
    /// description. Tools matching nothing are left out, so the result may
    /// be shorter than `k` or empty.
    pub fn search(&self, query: &str, k: usize) -> Vec<ToolDefinition> {
        let words = keywords(query);
        let mut scored: Vec<(usize, ToolDefinition)> = self
            .definitions()
            .into_iter()
            .filter_map(|def| {
                let name = def.name.to_lowercase();
                let description = def.description.to_lowercase();
                let score: usize = words
                    .iter()
                    .map(|w| {
                        if name.contains(w.as_str()) {
                            3
                        } else if description.contains(w.as_str()) {
                            1
                        } else {
                            0
                        }
                    })
                    .sum();
                (score > 0).then_some((score, def))
            })
            .collect();
        // Stable sort keeps name order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(k).map(|(_, def)| def).collect()
    }

    /// Check arguments against the tool's parameter schema.
    pub fn validate(&self, name: &str, arguments: &serde_json::Value) -> Result<(), ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        if let Err(errors) = entry.validator.validate(arguments) {
            let details: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(ToolError::InvalidArguments(details.join("; ")));
        }
        Ok(())
    }

    /// A registry holding only the named tools.
    pub fn subset(&self, names: &[&str]) -> Result<Self, ToolError> {
        let mut tools = HashMap::new();
        for name in names {
            let entry = self
                .tools
                .get(*name)
                .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
            tools.insert(name.to_string(), entry.clone());
        }
        Ok(Self { tools })
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Lowercase words of three or more letters, deduplicated.
fn keywords(text: &str) -> Vec<String> {
    let mut words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    words.sort_unstable();
    words.dedup();
    words
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}
