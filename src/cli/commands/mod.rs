//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod check;
mod config_cmd;
mod probe;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use loopguard::{ConfigFile, GuardConfig};

/// Output format for `config show`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Json,
}

#[derive(Parser)]
#[command(name = "loopguard")]
#[command(about = "HTTP request loop detection and circuit breaking")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "LOOPGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Send repeated requests to a URL through the guard and report outcomes
    Probe {
        /// URL to request
        url: String,
        /// Number of requests to send
        #[arg(short = 'n', long, default_value = "30")]
        count: usize,
        /// Milliseconds to wait between requests
        #[arg(short, long, default_value = "10")]
        interval_ms: u64,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Request timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how the guard classifies a URL
    Check {
        /// URL to classify
        url: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Output format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ConfigFormat,
    },
}

/// Load config from an explicit path or by discovery, then validate it.
async fn load_guard_config(path: Option<&PathBuf>) -> anyhow::Result<(GuardConfig, ConfigFile)> {
    let file = match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            ConfigFile::load_from_path(path).await?
        }
        None => ConfigFile::load().await,
    };

    if let Some(ref source) = file.source_path {
        tracing::info!("Loaded config from {}", source.display());
    }

    let config = file.clone().into_guard_config()?;
    Ok((config, file))
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, file) = load_guard_config(cli.config.as_ref()).await?;

    match cli.command {
        Commands::Probe {
            url,
            count,
            interval_ms,
            method,
            timeout,
            json,
        } => {
            let options = probe::ProbeOptions {
                count,
                interval: std::time::Duration::from_millis(interval_ms),
                method,
                timeout: std::time::Duration::from_secs(timeout),
                json,
            };
            probe::cmd_probe(config, &url, options).await
        }
        Commands::Check { url } => check::cmd_check(config, &url).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show { format } => {
                config_cmd::cmd_config_show(&config, file.source_path.as_deref(), format)
            }
        },
    }
}
