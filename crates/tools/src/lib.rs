//! Built-in tool implementations for agentloop.
//!
//! The built-ins are deterministic operations tools (server status,
//! service checks, SQL, database deletion, email, runbook lookup) plus the
//! clarification and fact memory tools. Remote tools are served over HTTP
//! by a tool server and described in config.

pub mod ask_user;
pub mod check_status;
pub mod delete_database;
pub mod knowledge_base;
pub mod memory_tools;
pub mod ping;
pub mod remote;
pub mod run_sql;
pub mod send_email;
pub mod server_status;

use agentloop_config::ToolsConfig;
use agentloop_core::error::ToolError;
use agentloop_core::memory::FactStore;
use agentloop_core::tool::ToolRegistry;
use std::sync::Arc;

pub use remote::{RemoteTool, check_version_compatibility};

/// Create a registry with all built-in tools.
pub fn default_registry() -> Result<ToolRegistry, ToolError> {
    ToolRegistry::new()
        .with(server_status::GetServerStatusTool)?
        .with(check_status::CheckStatusTool)?
        .with(ping::PingTool)?
        .with(run_sql::RunSqlTool)?
        .with(delete_database::DeleteDatabaseTool)?
        .with(send_email::SendEmailTool)?
        .with(knowledge_base::SearchKnowledgeBaseTool)?
        .with(ask_user::AskUserTool)
}

/// Build the registry described by the `[tools]` config section.
pub fn registry_from_config(config: &ToolsConfig) -> Result<ToolRegistry, ToolError> {
    let mut registry = if config.builtin {
        default_registry()?
    } else {
        ToolRegistry::new()
    };
    for remote in &config.remote {
        registry.register(Arc::new(RemoteTool::new(remote.clone(), config.timeout_secs)?))?;
    }
    tracing::debug!(tools = ?registry.names(), "Tool registry built");
    Ok(registry)
}

/// Add `remember_fact` and `recall_facts` backed by `store`.
pub fn register_memory_tools(
    registry: &mut ToolRegistry,
    store: Arc<dyn FactStore>,
    default_ttl_secs: Option<u64>,
) -> Result<(), ToolError> {
    registry.register(Arc::new(memory_tools::RememberFactTool::new(
        store.clone(),
        default_ttl_secs,
    )))?;
    registry.register(Arc::new(memory_tools::RecallFactsTool::new(store)))
}
