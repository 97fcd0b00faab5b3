//! `agentloop tools`: list what the model can call.

use super::load_config;
use agentloop_agent::fact_store_from_config;
use agentloop_tools::{register_memory_tools, registry_from_config};
use std::path::Path;

pub async fn run(config_path: Option<&Path>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let mut registry = registry_from_config(&config.tools)?;
    if let Some(store) = fact_store_from_config(&config) {
        register_memory_tools(&mut registry, store, config.memory.default_ttl_secs)?;
    }
    let definitions = registry.definitions();

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    println!("  {:<20} {:<8} {:<8} {:<9} DESCRIPTION", "NAME", "RISK", "CONFIRM", "VERSION");
    for def in &definitions {
        println!(
            "  {:<20} {:<8} {:<8} {:<9} {}",
            def.name,
            def.risk_level.to_string(),
            if def.needs_confirmation() { "yes" } else { "no" },
            def.version,
            def.description
        );
    }

    if !config.delegates.is_empty() {
        println!();
        println!("  Delegates:");
        for delegate in &config.delegates {
            println!(
                "  {:<20} {} [tools: {}]",
                delegate.name,
                delegate.description,
                delegate.tools.join(", ")
            );
        }
    }
    Ok(())
}
