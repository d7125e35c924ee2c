//! CLI argument parsing for the watchdog daemon.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// Ops Watchdog Daemon
///
/// Runs the AI-ops background jobs on cron schedules with timeouts,
/// retries and per-job circuit breakers.
#[derive(Parser, Debug)]
#[command(name = "watchdog-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/ops-watchdog/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the watchdog daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Override ops API port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override breadcrumb database URL
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Print the effective configuration as TOML
    Config,

    /// List built-in jobs and their schedules
    Jobs,
}
