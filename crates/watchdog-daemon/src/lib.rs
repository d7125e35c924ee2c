//! Watchdog daemon library exports.
//!
//! This crate provides the `watchdog-daemon` binary that hosts the
//! scheduler next to the main application.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, stop, status, config, jobs)
//! - `settings`: Layered configuration
//! - `ops`: Ops HTTP API (health, status, trigger, pause, breaker reset)
//! - `backend`: HTTP client for the application's AI-ops endpoints
//! - `breadcrumbs`: SQLite audit rows written by the built-in jobs

pub mod backend;
pub mod breadcrumbs;
pub mod cli;
pub mod commands;
pub mod error;
pub mod ops;
pub mod settings;

pub use backend::HttpOpsBackend;
pub use breadcrumbs::SqliteBreadcrumbStore;
pub use cli::{Cli, Commands};
pub use commands::{list_jobs, show_config, show_status, start_daemon, stop_daemon};
pub use error::DaemonError;
pub use ops::{router, run_ops_server_with_shutdown};
pub use settings::Settings;
