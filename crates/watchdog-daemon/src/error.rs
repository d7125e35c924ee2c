//! Error types for the watchdog daemon.

use thiserror::Error;

/// Errors raised while wiring up the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Breadcrumb database error
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// HTTP client setup error
    #[error("Backend error: {0}")]
    Backend(#[from] reqwest::Error),

    /// Scheduler registration or lifecycle error
    #[error(transparent)]
    Scheduler(#[from] watchdog_scheduler::SchedulerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaemonError::Config("ops_port out of range".into());
        assert_eq!(err.to_string(), "Configuration error: ops_port out of range");

        let err = DaemonError::from(watchdog_scheduler::SchedulerError::AlreadyRunning);
        assert_eq!(err.to_string(), "Scheduler is already running");
    }
}
