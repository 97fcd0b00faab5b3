//! Subcommand implementations and the helpers they share.

pub mod chat;
pub mod config_cmd;
pub mod resume;
pub mod run;
pub mod tools;

use agentloop_agent::{AgentLoop, build_agent, fact_store_from_config};
use agentloop_config::AppConfig;
use agentloop_core::event::EventBus;
use agentloop_core::run::{RunCheckpoint, RunResult, RunState, RunStatus};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Where the config comes from when `--config` is not given.
pub fn default_config_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

/// Load the config from `path` or the default location, with env overrides.
pub fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// Build the agent from config, explaining a missing API key up front.
pub fn build_runtime(config: &AppConfig) -> CliResult<AgentLoop> {
    let gateway = match agentloop_providers::build_gateway(config) {
        Ok(gateway) => gateway,
        Err(e) => {
            if !config.has_api_key() {
                eprintln!();
                eprintln!("  ERROR: No API key configured!");
                eprintln!();
                eprintln!("  Set one of these environment variables:");
                eprintln!("    AGENTLOOP_API_KEY=...   (generic)");
                eprintln!("    OPENAI_API_KEY=sk-...   (OpenAI direct)");
                eprintln!();
                eprintln!("  Or point [gateway].api_url at a local server in:");
                eprintln!("    {}", default_config_path().display());
                eprintln!();
            }
            return Err(e.into());
        }
    };
    let facts = fact_store_from_config(config);
    Ok(build_agent(config, gateway, facts, Arc::new(EventBus::default()))?)
}

/// Await `run` with Ctrl+C wired to `cancel`.
pub async fn interruptible<F>(cancel: &CancellationToken, run: F) -> RunResult
where
    F: Future<Output = RunResult>,
{
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n  Interrupted, stopping the run...");
                cancel.cancel();
            }
        }
    });
    let result = run.await;
    watcher.abort();
    result
}

/// Save the run state to `path` after every step, not only at the end.
pub fn checkpoint_each_step(agent: AgentLoop, path: &Path) -> AgentLoop {
    let path = path.to_path_buf();
    agent.with_checkpoint(Arc::new(move |state: &RunState| {
        if let Err(e) = RunCheckpoint::from_state(state).save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Step checkpoint failed");
        }
    }))
}

pub fn save_checkpoint(path: &Path, state: &RunState) -> CliResult<()> {
    RunCheckpoint::from_state(state).save(path)?;
    tracing::debug!(path = %path.display(), "Checkpoint saved");
    Ok(())
}

pub fn load_checkpoint(path: &Path) -> CliResult<RunState> {
    let state = RunCheckpoint::load(path)
        .and_then(RunCheckpoint::into_state)
        .map_err(|e| format!("Failed to load checkpoint {}: {e}", path.display()))?;
    Ok(state)
}

/// Print a run result. Answers go to stdout, status notes to stderr.
pub fn print_result(result: &RunResult, json: bool) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        if !result.text.is_empty() {
            println!("{}", result.text);
        }
        match result.status {
            RunStatus::Completed => {}
            RunStatus::AwaitingConfirmation | RunStatus::AwaitingClarification => {
                if let Some(pending) = &result.pending {
                    eprintln!();
                    eprintln!("  [{}] {}", result.status, pending.prompt());
                }
            }
            _ => {
                let reason = result
                    .stop_reason
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                eprintln!();
                eprintln!("  [{}] {reason}", result.status);
            }
        }
    }

    if result.status == RunStatus::Failed {
        return Err(format!("Run failed after {} model call(s)", result.model_calls).into());
    }
    Ok(())
}
