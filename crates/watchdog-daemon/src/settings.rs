//! Configuration loading for the watchdog daemon.
//!
//! Layered config: defaults -> config file -> `--config` file -> env vars.
//! CLI flags are applied by the caller on top of the loaded settings.
//! The default config file lives at `~/.config/ops-watchdog/config.toml`.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use watchdog_scheduler::jobs::BuiltinJobsConfig;
use watchdog_scheduler::SchedulerConfig;

use crate::error::DaemonError;

const APP_NAME: &str = "ops-watchdog";

/// Main daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Ops API host
    #[serde(default = "default_ops_host")]
    pub ops_host: String,

    /// Ops API port
    #[serde(default = "default_ops_port")]
    pub ops_port: u16,

    /// SQLite URL of the breadcrumb database
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Base URL of the main application's internal API
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,

    /// Bearer token for the application's internal API (env var only)
    #[serde(default, skip_serializing)]
    pub app_api_token: Option<String>,

    /// Per-request timeout for backend calls, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Scheduler defaults, breaker thresholds and shutdown timeout
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Built-in job schedules and policies
    #[serde(default)]
    pub jobs: BuiltinJobsConfig,
}

fn default_ops_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ops_port() -> u16 {
    7461
}

fn default_database_url() -> String {
    let path = ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join("breadcrumbs.db"))
        .unwrap_or_else(|| PathBuf::from("./breadcrumbs.db"));
    format!("sqlite://{}?mode=rwc", path.to_string_lossy())
}

fn default_app_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ops_host: default_ops_host(),
            ops_port: default_ops_port(),
            database_url: default_database_url(),
            app_base_url: default_app_base_url(),
            app_api_token: None,
            request_timeout_secs: default_request_timeout(),
            log_level: default_log_level(),
            scheduler: SchedulerConfig::default(),
            jobs: BuiltinJobsConfig::default(),
        }
    }
}

/// Default config file location (without extension).
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config")
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/ops-watchdog/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (WATCHDOG_*, `__` between nested keys)
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, DaemonError> {
        Self::load_from(&default_config_path().to_string_lossy(), cli_config_path)
    }

    fn load_from(default_path: &str, cli_config_path: Option<&str>) -> Result<Self, DaemonError> {
        let mut builder = Config::builder()
            .set_default("ops_host", default_ops_host())
            .map_err(|e| DaemonError::Config(e.to_string()))?
            .set_default("ops_port", default_ops_port() as i64)
            .map_err(|e| DaemonError::Config(e.to_string()))?
            .set_default("database_url", default_database_url())
            .map_err(|e| DaemonError::Config(e.to_string()))?
            .set_default("app_base_url", default_app_base_url())
            .map_err(|e| DaemonError::Config(e.to_string()))?
            .set_default("request_timeout_secs", default_request_timeout() as i64)
            .map_err(|e| DaemonError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| DaemonError::Config(e.to_string()))?
            .add_source(File::with_name(default_path).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: WATCHDOG_OPS_PORT, WATCHDOG_SCHEDULER__SHUTDOWN_TIMEOUT_SECS
        builder = builder.add_source(
            Environment::with_prefix("WATCHDOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| DaemonError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| DaemonError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the scheduler would refuse at startup.
    pub fn validate(&self) -> Result<(), DaemonError> {
        self.scheduler.parse_timezone()?;
        self.scheduler
            .default_policy
            .validate()
            .map_err(|e| DaemonError::Config(format!("scheduler.default_policy: {}", e)))?;
        if self.request_timeout_secs == 0 {
            return Err(DaemonError::Config("request_timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Socket address of the ops API
    pub fn ops_addr(&self) -> String {
        format!("{}:{}", self.ops_host, self.ops_port)
    }

    /// Effective settings as TOML, secrets omitted.
    pub fn to_toml(&self) -> Result<String, DaemonError> {
        toml::to_string_pretty(self).map_err(|e| DaemonError::Config(e.to_string()))
    }
}
