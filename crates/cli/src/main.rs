//! Cerebro CLI — the main entry point.
//!
//! Without a subcommand, `cerebro` opens an interactive chat on today's
//! thread (or sends one message with `--message`).
//!
//! Commands:
//! - `config` — Show, locate or initialise the config file
//! - `doctor` — Diagnose configuration and tool availability

use cerebro_config::{CheckpointBackend, ConfigOverrides};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "cerebro",
    about = "Cerebro — a personal assistant for your brain notes",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    message: Option<String>,

    /// Start a new thread instead of resuming today's
    #[arg(long, conflicts_with = "thread")]
    new_thread: bool,

    /// Continue a specific thread
    #[arg(long)]
    thread: Option<String>,

    /// Model identifier (overrides MODEL and the config file)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Maximum model calls per message
    #[arg(long, global = true)]
    max_steps: Option<u32>,

    /// Checkpoint backend: sqlite, file or memory
    #[arg(long, global = true)]
    checkpoint: Option<CheckpointBackend>,

    /// Directory for chat history and the last-thread file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose configuration and tool availability
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration (secrets redacted)
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            model: self.model.clone(),
            max_steps: self.max_steps,
            checkpoint_backend: self.checkpoint,
            data_dir: self.data_dir.clone(),
            ..ConfigOverrides::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so chat output on stdout stays clean.
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let overrides = cli.overrides();
    match cli.command {
        Some(Commands::Config { action }) => match action {
            ConfigAction::Show => commands::config_cmd::show(&overrides).await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
        Some(Commands::Doctor) => commands::doctor::run(&overrides).await?,
        None => {
            let options = commands::chat::ChatOptions {
                message: cli.message,
                new_thread: cli.new_thread,
                thread: cli.thread,
                overrides,
            };
            commands::chat::run(options).await?
        }
    }

    Ok(())
}
