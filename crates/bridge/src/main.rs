//! WebSSH Bridge
//!
//! Relays browser WebSocket sessions to interactive SSH shells.

use std::path::PathBuf;

use anyhow::Context;
use bridge::config::Config;
use bridge::orchestrator::BridgeServer;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// WebSSH Bridge - relays browser terminals to SSH shells.
#[derive(Parser, Debug)]
#[command(name = "webssh-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `start`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for the bridge.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the bridge and serve until SIGINT or SIGTERM
    Start,

    /// Load and validate the configuration, then print it
    CheckConfig,
}

/// Loads the file layer, applies env overrides and validates.
fn load_config(cli: &Cli) -> anyhow::Result<(Config, Vec<&'static str>)> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    let overridden = config.apply_env_overrides();
    config.validate().context("Invalid configuration")?;
    Ok((config, overridden))
}

/// `RUST_LOG` wins, then `--verbose`, then the configured level.
fn log_filter(verbose: bool, config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose {
            "debug"
        } else {
            config.logging.level.as_str()
        };
        EnvFilter::new(level)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, overridden) = load_config(&cli)?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, &config))
        .init();

    if let Some(path) = &cli.config {
        tracing::info!("Using config file: {:?}", path);
    }
    for key in overridden {
        tracing::info!("Config overridden from environment: {}", key);
    }

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            tracing::info!("WebSSH bridge starting...");
            let mut server = BridgeServer::new(config);
            server.start().await?;

            wait_for_shutdown_signal().await?;

            server.stop().await?;
        }
        Commands::CheckConfig => {
            println!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Received Ctrl-C");
    Ok(())
}
