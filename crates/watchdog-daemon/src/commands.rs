//! Command implementations for the watchdog daemon.
//!
//! Handles:
//! - start: load config, open breadcrumb store, register jobs, serve ops API
//! - stop: signal running daemon to stop (via PID file)
//! - status: check if daemon is running
//! - config / jobs: print effective settings and job schedules

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use watchdog_scheduler::jobs::{
    register_builtin_jobs, AiOpsBackend, BreadcrumbStore, BuiltinJobsConfig, FORECAST_JOB,
    GOVERNANCE_JOB, LEARNING_JOB, SELF_HEAL_JOB,
};
use watchdog_scheduler::{BroadcastPublisher, JobPolicy, SchedulerService, Sinks, TracingMetrics};

use crate::backend::HttpOpsBackend;
use crate::breadcrumbs::SqliteBreadcrumbStore;
use crate::ops::run_ops_server_with_shutdown;
use crate::settings::Settings;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| {
            #[cfg(unix)]
            {
                dirs.runtime_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.cache_dir().to_path_buf())
            }
            #[cfg(not(unix))]
            {
                dirs.cache_dir().to_path_buf()
            }
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ops-watchdog")
        .join("daemon.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!(path = ?pid_path, "Wrote PID file");
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!(error = %e, "Failed to remove PID file");
        } else {
            info!("Removed PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Load settings and apply CLI overrides (highest precedence).
fn load_settings(
    config_path: Option<&str>,
    port_override: Option<u16>,
    database_url_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(port) = port_override {
        settings.ops_port = port;
    }
    if let Some(url) = database_url_override {
        settings.database_url = url.to_string();
    }
    if let Some(level) = log_level_override {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

fn init_tracing(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Resolves on the first SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Start the watchdog daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Open the breadcrumb store and the application backend
/// 3. Register built-in jobs and start the scheduler
/// 4. Serve the ops API until SIGINT/SIGTERM, then drain running jobs
pub async fn start_daemon(
    config_path: Option<&str>,
    foreground: bool,
    port_override: Option<u16>,
    database_url_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let settings = load_settings(
        config_path,
        port_override,
        database_url_override,
        log_level_override,
    )?;
    init_tracing(&settings.log_level)?;

    info!("Watchdog daemon starting...");
    info!("  Ops address: {}", settings.ops_addr());
    info!("  Application: {}", settings.app_base_url);
    info!("  Log level: {}", settings.log_level);

    if !foreground {
        warn!("Background mode is not supported, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    let store = SqliteBreadcrumbStore::connect(&settings.database_url)
        .await
        .context("Failed to open breadcrumb store")?;
    let store: Arc<dyn BreadcrumbStore> = Arc::new(store);

    let backend = HttpOpsBackend::new(
        &settings.app_base_url,
        settings.app_api_token.clone(),
        Duration::from_secs(settings.request_timeout_secs),
    )
    .context("Failed to build application client")?;
    let backend: Arc<dyn AiOpsBackend> = Arc::new(backend);

    let events = BroadcastPublisher::new(EVENT_CHANNEL_CAPACITY);
    let sinks = Sinks::new(Arc::new(TracingMetrics), Arc::new(events));
    let scheduler = SchedulerService::new(settings.scheduler.clone(), sinks)
        .await
        .context("Failed to create scheduler")?;

    let registered = register_builtin_jobs(&scheduler, backend, store, &settings.jobs)
        .context("Failed to register built-in jobs")?;
    info!(jobs = ?registered, "Registered built-in jobs");

    scheduler.start().await.context("Failed to start scheduler")?;

    let addr: SocketAddr = settings
        .ops_addr()
        .parse()
        .context("Invalid ops API address")?;

    write_pid_file()?;

    // The server keeps answering status requests until the scheduler has drained.
    let (server_stop_tx, server_stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(run_ops_server_with_shutdown(
        addr,
        scheduler.clone(),
        async move {
            server_stop_rx.await.ok();
        },
    ));

    let early_exit = tokio::select! {
        _ = wait_for_signal() => None,
        joined = &mut server => {
            error!("Ops API stopped unexpectedly, shutting down...");
            Some(joined)
        }
    };

    let report = scheduler.graceful_shutdown(None).await;
    if report.drained {
        info!(waited_ms = report.waited_ms, "All jobs drained");
    } else {
        warn!(abandoned = ?report.abandoned, "Shutdown deadline reached with jobs still running");
    }

    let joined = match early_exit {
        Some(joined) => joined,
        None => {
            let _ = server_stop_tx.send(());
            server.await
        }
    };

    remove_pid_file();

    match joined {
        Ok(result) => result.context("Ops API error"),
        Err(e) => Err(anyhow::anyhow!("Ops API task failed: {}", e)),
    }
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    info!("Stopping daemon (PID {})", pid);

    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                anyhow::bail!("Failed to send SIGTERM to daemon");
            }
        }
        println!("Sent SIGTERM to daemon (PID {}); running jobs will drain", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not supported on this platform");
    }

    Ok(())
}

/// Show daemon status.
pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();

    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("Watchdog daemon is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
        }
        Some(pid) => {
            println!(
                "Watchdog daemon is NOT running (stale PID {} in {:?})",
                pid, pid_path
            );
        }
        None => println!("Watchdog daemon is NOT running (no PID file)"),
    }
    Ok(())
}

/// Print the effective configuration.
pub fn show_config(config_path: Option<&str>, log_level_override: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, None, None, log_level_override)?;
    print!("{}", settings.to_toml()?);
    Ok(())
}

/// One line of the `jobs` listing.
#[derive(Debug, Clone, PartialEq)]
pub struct JobLine {
    pub name: &'static str,
    pub enabled: bool,
    pub cron: String,
    pub timezone: String,
    pub policy: JobPolicy,
}

pub fn job_lines(jobs: &BuiltinJobsConfig) -> Vec<JobLine> {
    vec![
        JobLine {
            name: FORECAST_JOB,
            enabled: jobs.ai_forecast.enabled,
            cron: jobs.ai_forecast.cron.clone(),
            timezone: jobs.ai_forecast.timezone.clone(),
            policy: jobs.ai_forecast.policy.clone(),
        },
        JobLine {
            name: LEARNING_JOB,
            enabled: jobs.ai_learning.enabled,
            cron: jobs.ai_learning.cron.clone(),
            timezone: jobs.ai_learning.timezone.clone(),
            policy: jobs.ai_learning.policy.clone(),
        },
        JobLine {
            name: GOVERNANCE_JOB,
            enabled: jobs.governance_score.enabled,
            cron: jobs.governance_score.cron.clone(),
            timezone: jobs.governance_score.timezone.clone(),
            policy: jobs.governance_score.policy.clone(),
        },
        JobLine {
            name: SELF_HEAL_JOB,
            enabled: jobs.self_heal.enabled,
            cron: jobs.self_heal.cron.clone(),
            timezone: jobs.self_heal.timezone.clone(),
            policy: jobs.self_heal.policy.clone(),
        },
    ]
}

/// List built-in jobs with their schedules and policies.
pub fn list_jobs(config_path: Option<&str>, log_level_override: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, None, None, log_level_override)?;

    println!(
        "{:<18} {:<8} {:<18} {:<16} {:>9} {:>8}",
        "JOB", "ENABLED", "CRON", "TIMEZONE", "TIMEOUT", "RETRIES"
    );
    for line in job_lines(&settings.jobs) {
        println!(
            "{:<18} {:<8} {:<18} {:<16} {:>8}s {:>8}",
            line.name,
            if line.enabled { "yes" } else { "no" },
            line.cron,
            line.timezone,
            line.policy.timeout().as_secs(),
            line.policy.max_retries
        );
    }
    Ok(())
}
