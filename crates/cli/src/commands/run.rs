//! `agentloop run`: one message, one run.

use super::{
    build_runtime, checkpoint_each_step, interruptible, load_config, print_result, save_checkpoint,
};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub async fn run(
    config_path: Option<&Path>,
    message: &str,
    checkpoint: Option<PathBuf>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let mut agent = build_runtime(&config)?;
    if let Some(path) = &checkpoint {
        agent = checkpoint_each_step(agent, path);
    }

    let cancel = CancellationToken::new();
    let mut state = agent.start(message).await;
    let result = interruptible(&cancel, agent.drive(&mut state, &cancel)).await;

    match &checkpoint {
        Some(path) => save_checkpoint(path, &state)?,
        None if result.status.is_awaiting_user() && !json => {
            eprintln!("  (rerun with --checkpoint <file> to be able to resume this run)");
        }
        None => {}
    }

    print_result(&result, json)
}
