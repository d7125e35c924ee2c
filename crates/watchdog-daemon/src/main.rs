//! Ops Watchdog Daemon
//!
//! Runs the AI-ops background jobs with timeouts, retries, circuit
//! breakers and graceful shutdown.
//!
//! # Usage
//!
//! ```bash
//! watchdog-daemon start [--foreground] [--port PORT] [--database-url URL]
//! watchdog-daemon stop
//! watchdog-daemon status
//! watchdog-daemon config
//! watchdog-daemon jobs
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/ops-watchdog/config.toml)
//! 3. Environment variables (WATCHDOG_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use watchdog_daemon::{
    list_jobs, show_config, show_status, start_daemon, stop_daemon, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            foreground,
            port,
            database_url,
        } => {
            start_daemon(
                cli.config.as_deref(),
                foreground,
                port,
                database_url.as_deref(),
                cli.log_level.as_deref(),
            )
            .await?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status => {
            show_status()?;
        }
        Commands::Config => {
            show_config(cli.config.as_deref(), cli.log_level.as_deref())?;
        }
        Commands::Jobs => {
            list_jobs(cli.config.as_deref(), cli.log_level.as_deref())?;
        }
    }

    Ok(())
}
