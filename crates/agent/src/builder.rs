//! Assemble a ready-to-run agent from the application config.

use crate::delegation::DelegateTool;
use crate::loop_runner::AgentLoop;
use agentloop_config::AppConfig;
use agentloop_core::event::EventBus;
use agentloop_core::gateway::ModelGateway;
use agentloop_core::memory::FactStore;
use agentloop_memory::{FileFactStore, InMemoryFactStore};
use agentloop_tools::{register_memory_tools, registry_from_config};
use std::sync::Arc;
use tracing::debug;

/// The fact store selected by `[memory].backend`, or `None` when disabled.
pub fn fact_store_from_config(config: &AppConfig) -> Option<Arc<dyn FactStore>> {
    match config.memory.backend.as_str() {
        "file" => Some(Arc::new(FileFactStore::new(config.facts_path()))),
        "memory" => Some(Arc::new(InMemoryFactStore::new())),
        _ => None,
    }
}

/// Build the agent loop: configured tools, memory tools when a store is
/// given, and one delegate tool per `[[delegates]]` entry.
///
/// Delegates draw their tools from the base registry, so a specialist can
/// never delegate further.
pub fn build_agent(
    config: &AppConfig,
    gateway: Arc<dyn ModelGateway>,
    facts: Option<Arc<dyn FactStore>>,
    event_bus: Arc<EventBus>,
) -> agentloop_core::Result<AgentLoop> {
    let mut registry = registry_from_config(&config.tools)?;
    if let Some(store) = &facts {
        register_memory_tools(&mut registry, store.clone(), config.memory.default_ttl_secs)?;
    }

    let base = AgentLoop::from_config(config, gateway.clone(), registry.clone())
        .with_event_bus(event_bus.clone());
    for delegate in &config.delegates {
        let names: Vec<&str> = delegate.tools.iter().map(String::as_str).collect();
        let tools = base.tools().subset(&names)?;
        let specialist = base.subagent(&delegate.role_prompt, tools, delegate.max_iterations);
        registry.register(Arc::new(DelegateTool::new(
            &delegate.name,
            &delegate.description,
            specialist,
        )))?;
        debug!(delegate = %delegate.name, tools = ?names, "Registered delegate");
    }

    let mut agent = AgentLoop::from_config(config, gateway, registry).with_event_bus(event_bus);
    if let Some(store) = facts {
        agent = agent.with_fact_store(store);
    }
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedGateway;
    use agentloop_config::DelegateConfig;

    fn gateway() -> Arc<dyn ModelGateway> {
        Arc::new(ScriptedGateway::replies(vec![]))
    }

    #[test]
    fn memory_backend_selection() {
        let mut config = AppConfig::default();
        assert_eq!(fact_store_from_config(&config).unwrap().name(), "memory");

        let dir = tempfile::tempdir().unwrap();
        config.memory.backend = "file".into();
        config.memory.path = Some(dir.path().join("facts.jsonl").display().to_string());
        assert_eq!(fact_store_from_config(&config).unwrap().name(), "file");

        config.memory.backend = "none".into();
        assert!(fact_store_from_config(&config).is_none());
    }

    #[test]
    fn build_registers_memory_and_delegate_tools() {
        let mut config = AppConfig::default();
        config.delegates.push(DelegateConfig {
            name: "ask_dba".into(),
            description: "Ask the database specialist".into(),
            role_prompt: "You are a DBA.".into(),
            tools: vec!["run_sql".into()],
            max_iterations: 5,
        });
        let facts = fact_store_from_config(&config);

        let agent = build_agent(&config, gateway(), facts, Arc::new(EventBus::default())).unwrap();
        let names = agent.tools().names();
        assert!(names.contains(&"ask_dba"));
        assert!(names.contains(&"remember_fact"));
        assert!(names.contains(&"get_server_status"));
        assert_eq!(agent.policy().max_iterations, config.agent.max_iterations);
    }

    #[test]
    fn delegate_with_unknown_tool_is_rejected() {
        let mut config = AppConfig::default();
        config.delegates.push(DelegateConfig {
            name: "ask_dba".into(),
            description: "dba".into(),
            role_prompt: "You are a DBA.".into(),
            tools: vec!["format_disk".into()],
            max_iterations: 5,
        });
        let err = build_agent(&config, gateway(), None, Arc::new(EventBus::default()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("format_disk"));
    }
}
