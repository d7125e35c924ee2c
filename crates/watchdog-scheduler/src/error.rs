//! Error types for the scheduler crate.
//!
//! `SchedulerError` covers registration and lifecycle failures. `JobError`
//! is what a job body returns; it never escapes the executor and ends up
//! as the `error` string of a [`JobRun`](crate::JobRun).

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Error from the underlying tokio-cron-scheduler
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Invalid cron expression
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid timezone string
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Job not found in scheduler
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// A job with this name is already registered
    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    /// Scheduler is already running
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler is not running")]
    NotRunning,

    /// Graceful shutdown has started; no further lifecycle changes
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Scheduler(err.to_string())
    }
}

/// Failure reported by a job body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// The job ran and reported a failure
    #[error("{0}")]
    Failed(String),

    /// The job task panicked
    #[error("job panicked: {0}")]
    Panicked(String),

    /// A collaborator (database, application backend) failed
    #[error("backend error: {0}")]
    Backend(String),
}

impl JobError {
    /// Shorthand for [`JobError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::Failed(msg.into())
    }
}
