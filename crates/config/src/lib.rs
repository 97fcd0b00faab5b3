//! Configuration loading, validation, and management for agentloop.
//!
//! Loads configuration from `~/.agentloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use agentloop_core::tool::RiskLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.agentloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion endpoint settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Loop limits and the default role prompt
    #[serde(default)]
    pub agent: AgentConfig,

    /// Context window management
    #[serde(default)]
    pub context: ContextConfig,

    /// Tool execution and remote tool servers
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Fact memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Specialist agents the main loop may delegate to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delegates: Vec<DelegateConfig>,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_gateway_timeout() -> u64 {
    90
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API (OpenAI, Ollama, LM Studio, ...)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<u32>,

    /// Per-request timeout
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,

    /// Retries for transient failures, after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before retry `n` is `retry_base_delay_ms * 2^n`
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_response_tokens: None,
            timeout_secs: default_gateway_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Token budget for one run, summed over model calls
    #[serde(default = "default_run_max_tokens")]
    pub max_tokens: u64,

    /// Wall-clock deadline for one run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,

    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

fn default_system_prompt() -> String {
    "You are a careful DevOps assistant. Use the available tools to check facts \
     before answering, and answer concisely once you know enough."
        .into()
}
fn default_max_iterations() -> u32 {
    10
}
fn default_run_max_tokens() -> u64 {
    100_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_iterations: default_max_iterations(),
            max_tokens: default_run_max_tokens(),
            run_timeout_secs: None,
            parallel_tool_calls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Size of the model's context window, in estimated tokens
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Fraction of the window at which prioritization starts
    #[serde(default = "default_prioritize_threshold")]
    pub prioritize_threshold: f32,

    /// Fraction of the window at which summarization starts
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: f32,

    /// Most recent messages that are always kept verbatim
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

fn default_max_context_tokens() -> usize {
    4000
}
fn default_prioritize_threshold() -> f32 {
    0.8
}
fn default_summarize_threshold() -> f32 {
    0.9
}
fn default_keep_recent() -> usize {
    5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            prioritize_threshold: default_prioritize_threshold(),
            summarize_threshold: default_summarize_threshold(),
            keep_recent: default_keep_recent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per-call execution timeout
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,

    /// Register the built-in operations tools
    #[serde(default = "default_true")]
    pub builtin: bool,

    /// Tools served over HTTP by a tool server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote: Vec<RemoteToolConfig>,

    /// Offer the model only the tools most relevant to the user's message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_top_k: Option<usize>,
}

fn default_tool_timeout() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
            builtin: true,
            remote: vec![],
            retrieval_top_k: None,
        }
    }
}

/// A tool hosted on a remote tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Base URL; requests go to `{endpoint}/execute`
    pub endpoint: String,

    /// Version of the tool definition this client was written against
    #[serde(default = "default_tool_version")]
    pub version: String,

    /// Other versions the definition accepts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compatible_with: Vec<String>,

    /// Version sent with each request; defaults to `version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_version: Option<String>,

    /// JSON Schema for the arguments
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,

    #[serde(default)]
    pub risk_level: RiskLevel,

    #[serde(default)]
    pub requires_confirmation: bool,
}

fn default_tool_version() -> String {
    "1.0".into()
}
fn default_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "memory", "file", or "none"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// JSONL file for the "file" backend; defaults to `~/.agentloop/facts.jsonl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Facts added to the system prompt at run start
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// TTL applied to extracted facts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl_secs: Option<u64>,

    /// Extract facts from each completed run
    #[serde(default)]
    pub auto_extract: bool,
}

fn default_memory_backend() -> String {
    "memory".into()
}
fn default_recall_limit() -> usize {
    5
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            recall_limit: default_recall_limit(),
            default_ttl_secs: None,
            auto_extract: false,
        }
    }
}

/// A specialist sub-agent exposed to the main loop as a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub role_prompt: String,

    /// Names of the tools the specialist may use
    #[serde(default)]
    pub tools: Vec<String>,

    #[serde(default = "default_delegate_iterations")]
    pub max_iterations: u32,
}

fn default_delegate_iterations() -> u32 {
    5
}

const MEMORY_BACKENDS: &[&str] = &["memory", "file", "none"];

impl AppConfig {
    /// Load configuration from the default path (~/.agentloop/config.toml).
    ///
    /// Environment variables override the file:
    /// - `AGENTLOOP_API_KEY`, then `OPENAI_API_KEY`
    /// - `AGENTLOOP_API_URL`, then `OPENAI_BASE_URL`
    /// - `AGENTLOOP_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("AGENTLOOP_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.gateway.api_key = Some(key);
        }
        if let Some(url) = lookup("AGENTLOOP_API_URL").or_else(|| lookup("OPENAI_BASE_URL")) {
            self.gateway.api_url = url;
        }
        if let Some(model) = lookup("AGENTLOOP_MODEL") {
            self.gateway.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentloop")
    }

    /// Where the file memory backend keeps its facts.
    pub fn facts_path(&self) -> PathBuf {
        self.memory
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("facts.jsonl"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.gateway.temperature) {
            return Err(ConfigError::ValidationError(
                "gateway.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.gateway.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.timeout_secs must be > 0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be >= 1".into(),
            ));
        }
        if self.agent.max_tokens == 0 {
            return Err(ConfigError::ValidationError("agent.max_tokens must be > 0".into()));
        }

        let ctx = &self.context;
        if ctx.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_context_tokens must be > 0".into(),
            ));
        }
        if !(ctx.prioritize_threshold > 0.0
            && ctx.prioritize_threshold <= ctx.summarize_threshold
            && ctx.summarize_threshold <= 1.0)
        {
            return Err(ConfigError::ValidationError(
                "context thresholds must satisfy 0 < prioritize <= summarize <= 1".into(),
            ));
        }
        if ctx.keep_recent == 0 {
            return Err(ConfigError::ValidationError(
                "context.keep_recent must be >= 1".into(),
            ));
        }

        if self.tools.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tools.timeout_secs must be > 0".into(),
            ));
        }
        if self.tools.retrieval_top_k == Some(0) {
            return Err(ConfigError::ValidationError(
                "tools.retrieval_top_k must be >= 1".into(),
            ));
        }
        let mut names = HashSet::new();
        for remote in &self.tools.remote {
            if !names.insert(remote.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate remote tool '{}'",
                    remote.name
                )));
            }
            if !remote.endpoint.starts_with("http://") && !remote.endpoint.starts_with("https://")
            {
                return Err(ConfigError::ValidationError(format!(
                    "remote tool '{}' endpoint must be an http(s) URL",
                    remote.name
                )));
            }
        }

        if !MEMORY_BACKENDS.contains(&self.memory.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "memory.backend must be one of {MEMORY_BACKENDS:?}, got '{}'",
                self.memory.backend
            )));
        }

        for delegate in &self.delegates {
            if delegate.max_iterations == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "delegate '{}' max_iterations must be >= 1",
                    delegate.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.gateway.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for agentloop_core::Error {
    fn from(err: ConfigError) -> Self {
        agentloop_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.model, "gpt-4o-mini");
        assert_eq!(config.tools.timeout_secs, 30);
        assert_eq!(config.context.max_context_tokens, 4000);
        assert_eq!(config.context.keep_recent, 5);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gateway.api_url, config.gateway.api_url);
        assert_eq!(parsed.agent.max_iterations, config.agent.max_iterations);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.gateway.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.context.prioritize_threshold = 0.95;
        config.context.summarize_threshold = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_tool_retrieval_rejected() {
        let mut config = AppConfig::default();
        config.tools.retrieval_top_k = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retrieval_top_k"));

        config.tools.retrieval_top_k = Some(3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_memory_backend_rejected() {
        let mut config = AppConfig::default();
        config.memory.backend = "sqlite".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("memory.backend"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.gateway.max_retries, 3);
    }

    #[test]
    fn load_from_file_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[gateway]
api_url = "http://localhost:11434/v1"
model = "llama3"

[agent]
max_iterations = 3

[[tools.remote]]
name = "restart_service"
endpoint = "http://localhost:8080"
version = "2.0"
compatible_with = ["1.5"]
risk_level = "high"
[tools.remote.parameters]
type = "object"
required = ["service"]
[tools.remote.parameters.properties.service]
type = "string"

[[delegates]]
name = "network_specialist"
role_prompt = "You are a network specialist."
tools = ["ping"]
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.gateway.model, "llama3");
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.context.keep_recent, 5);
        let remote = &config.tools.remote[0];
        assert_eq!(remote.risk_level, RiskLevel::High);
        assert_eq!(remote.parameters["required"][0], "service");
        assert_eq!(config.delegates[0].max_iterations, 5);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway\nmodel = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-fallback"),
            ("AGENTLOOP_API_KEY", "sk-primary"),
            ("OPENAI_BASE_URL", "http://localhost:1234/v1"),
            ("AGENTLOOP_MODEL", "qwen2.5"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.gateway.api_key.as_deref(), Some("sk-primary"));
        assert_eq!(config.gateway.api_url, "http://localhost:1234/v1");
        assert_eq!(config.gateway.model, "qwen2.5");
        assert!(config.has_api_key());
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.gateway.api_key = Some("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("max_context_tokens"));
        assert!(!toml_str.contains("api_key"));
    }

    #[test]
    fn remote_endpoint_must_be_http() {
        let mut config = AppConfig::default();
        config.tools.remote.push(RemoteToolConfig {
            name: "x".into(),
            description: String::new(),
            endpoint: "ftp://example".into(),
            version: default_tool_version(),
            compatible_with: vec![],
            request_version: None,
            parameters: default_parameters(),
            risk_level: RiskLevel::Low,
            requires_confirmation: false,
        });
        assert!(config.validate().is_err());
    }
}
