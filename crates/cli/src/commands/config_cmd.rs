//! `agentloop config`: configuration management commands.

use super::{default_config_path, load_config};
use agentloop_config::AppConfig;
use std::path::Path;

pub async fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e);
        }
    };
    println!("   Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.has_api_key() && !config.gateway.api_url.contains("localhost") {
        warnings.push("No API key set (set AGENTLOOP_API_KEY or OPENAI_API_KEY)".to_string());
    }
    if !config.tools.builtin && config.tools.remote.is_empty() {
        warnings.push("No tools enabled; the agent can only answer from its own knowledge".into());
    }
    for delegate in &config.delegates {
        if delegate.tools.is_empty() {
            warnings.push(format!("Delegate '{}' has no tools", delegate.name));
        }
    }

    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Endpoint:    {}", config.gateway.api_url);
    println!("   Model:       {}", config.gateway.model);
    println!("   Iterations:  {}", config.agent.max_iterations);
    println!("   Token cap:   {}", config.agent.max_tokens);
    println!("   Context:     {} tokens", config.context.max_context_tokens);
    println!("   Memory:      {}", config.memory.backend);
    println!("   Remote tools: {}", config.tools.remote.len());
    println!("   Delegates:   {}", config.delegates.len());
    Ok(())
}

pub async fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    if config.gateway.api_key.is_some() {
        config.gateway.api_key = Some("[REDACTED]".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    println!("{}", path.display());
    Ok(())
}

pub async fn init(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
