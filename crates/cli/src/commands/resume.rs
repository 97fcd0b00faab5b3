//! `agentloop resume`: answer a paused run from its checkpoint.

use super::{
    build_runtime, checkpoint_each_step, interruptible, load_checkpoint, load_config, print_result,
    save_checkpoint,
};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub async fn run(
    config_path: Option<&Path>,
    file: &Path,
    message: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let mut state = load_checkpoint(file)?;

    let reply = match message {
        Some(reply) => reply,
        None => {
            if let Some(pending) = &state.pending {
                eprintln!("  {}", pending.prompt());
            }
            eprint!("  You > ");
            std::io::stderr().flush()?;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            lines
                .next_line()
                .await?
                .ok_or("No reply given on stdin")?
        }
    };

    let agent = checkpoint_each_step(build_runtime(&config)?, file);
    let cancel = CancellationToken::new();
    let result = interruptible(&cancel, agent.resume(&mut state, reply.trim(), &cancel)).await;
    save_checkpoint(file, &state)?;

    print_result(&result, json)
}
