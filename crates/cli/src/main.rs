//! agentloop CLI, the main entry point.
//!
//! Commands:
//! - `run`     Send one message and print the result
//! - `chat`    Interactive multi-turn session
//! - `resume`  Answer a paused run saved in a checkpoint
//! - `tools`   List the registered tools
//! - `config`  Show, validate or initialize the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "agentloop",
    about = "agentloop: a tool-calling agent runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.agentloop/config.toml
    #[arg(short, long, global = true, env = "AGENTLOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single message to the agent
    Run {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Save the final run state here so a paused run can be resumed
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Chat with the agent interactively
    Chat {
        /// Continue from (and keep saving to) this checkpoint
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Resume a run saved with --checkpoint
    Resume {
        /// Checkpoint file written by `run` or `chat`
        file: PathBuf,

        /// The reply to the pending question (prompted for when omitted)
        #[arg(short, long)]
        message: Option<String>,

        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the tools the agent can call
    Tools {
        /// Print full definitions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API key redacted)
    Show,
    /// Check the configuration and print a summary
    Validate,
    /// Print the default config file path
    Path,
    /// Write a commented default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so answers and JSON on stdout stay clean
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            message,
            checkpoint,
            json,
        } => commands::run::run(config_path, &message, checkpoint, json).await?,
        Commands::Chat { checkpoint } => commands::chat::run(config_path, checkpoint).await?,
        Commands::Resume {
            file,
            message,
            json,
        } => commands::resume::run(config_path, &file, message, json).await?,
        Commands::Tools { json } => commands::tools::run(config_path, json).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path).await?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path).await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force).await?,
        },
    }

    Ok(())
}
