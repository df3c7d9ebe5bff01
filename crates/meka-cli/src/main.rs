//! Meka CLI
//!
//! Command-line observer for Meka game sessions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use meka_client::ClientConfig;

mod commands;
mod output;

use commands::watch::WatchOptions;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "meka")]
#[command(about = "Meka - watch and join turn-based game sessions")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a session and print its events
    Watch {
        /// Session ID
        session_id: String,
        /// Join the session as a participant
        #[arg(long)]
        join: bool,
        /// Mark yourself ready after connecting
        #[arg(long)]
        ready: bool,
    },
    /// Show the authenticated user
    Me,
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::config_file_path);
    let config = ClientConfig::load_from_path(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    init_logging(&config.log_level);

    match cli.command {
        Commands::Watch {
            session_id,
            join,
            ready,
        } => {
            commands::watch::watch(config, session_id, WatchOptions { join, ready }, &output)
                .await
        }
        Commands::Me => commands::me::show(&config, &output).await,
        Commands::Config { command } => match command.unwrap_or(ConfigCommands::Show) {
            ConfigCommands::Show => commands::config::show(&config, &config_path, &output),
            ConfigCommands::Path => commands::config::path(&config_path, &output),
        },
    }
}

/// Log to stderr so stdout stays parseable
///
/// `RUST_LOG` wins over the configured level.
fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("meka_client={},meka_cli={}", log_level, log_level))
    });

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
