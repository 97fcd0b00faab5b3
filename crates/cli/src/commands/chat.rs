//! `agentloop chat`: interactive multi-turn session.
//!
//! Every turn after the first resumes the same run state, so a paused run
//! is answered by simply typing the reply.

use super::{
    build_runtime, checkpoint_each_step, interruptible, load_checkpoint, load_config,
    save_checkpoint,
};
use agentloop_core::run::{RunState, RunStatus};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub async fn run(
    config_path: Option<&Path>,
    checkpoint: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let mut agent = build_runtime(&config)?;
    if let Some(path) = &checkpoint {
        agent = checkpoint_each_step(agent, path);
    }

    let mut state: Option<RunState> = match &checkpoint {
        Some(path) if path.exists() => Some(load_checkpoint(path)?),
        _ => None,
    };

    println!();
    println!("  agentloop chat");
    println!("  Model:   {}", config.gateway.model);
    println!("  Tools:   {}", agent.tools().names().join(", "));
    println!("  Memory:  {}", config.memory.backend);
    if let Some(state) = &state {
        println!("  Resumed: {} messages", state.messages.len());
        if let Some(pending) = &state.pending {
            println!("  Pending: {}", pending.prompt());
        }
    }
    println!("  Type 'exit' or press Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        let cancel = CancellationToken::new();
        let result = match state.as_mut() {
            Some(state) => interruptible(&cancel, agent.resume(state, input, &cancel)).await,
            None => {
                let mut fresh = agent.start(input).await;
                let result = interruptible(&cancel, agent.drive(&mut fresh, &cancel)).await;
                state = Some(fresh);
                result
            }
        };

        println!();
        println!("  Assistant > {}", result.text);
        match result.status {
            RunStatus::Completed => {}
            RunStatus::AwaitingConfirmation => println!("  (reply 'yes' to approve)"),
            RunStatus::AwaitingClarification => println!("  (waiting for your answer)"),
            status => {
                let reason = result
                    .stop_reason
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                println!("  [{status}] {reason}");
            }
        }
        println!();

        if let (Some(path), Some(state)) = (&checkpoint, &state) {
            save_checkpoint(path, state)?;
        }
    }

    Ok(())
}
