//! Background job watchdog for the ops platform.
//!
//! This crate runs named background jobs on timezone-aware cron schedules
//! (via `tokio-cron-scheduler`) and supervises every run.
//!
//! # Features
//!
//! - Per-attempt timeout with retry and exponential backoff
//! - At most one execution per job name, retry sleeps included
//! - Per-job circuit breaker (closed / open / half-open)
//! - Manual trigger, pause and resume through the same admission path
//! - Per-job metrics and retry state for observability
//! - Graceful shutdown that drains running jobs up to a deadline
//! - Built-in AI-ops jobs (`jobs` module)
//!
//! # Example
//!
//! ```ignore
//! use watchdog_scheduler::{JobDefinition, JobPolicy, SchedulerConfig, SchedulerService, Sinks};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default(), Sinks::default()).await?;
//!
//! scheduler.register(
//!     JobDefinition::new("ai_forecast", |_ctx| async { generate().await })
//!         .with_schedule("0 0 2 * * *")
//!         .with_policy(JobPolicy::new(
//!             Duration::from_secs(600),
//!             2,
//!             Duration::from_secs(30),
//!             2.0,
//!         )),
//! )?;
//!
//! scheduler.start().await?;
//! // ...
//! let report = scheduler.graceful_shutdown(None).await;
//! ```

mod breaker;
mod config;
mod error;
mod executor;
mod jitter;
mod metrics;
mod overlap;
mod registry;
mod run;
mod scheduler;
mod shutdown;
mod sink;
mod status;

pub mod jobs;

pub use breaker::{BreakerDecision, BreakerEntry, BreakerState, CircuitBreakers};
pub use config::{BreakerConfig, JobPolicy, SchedulerConfig};
pub use error::{JobError, SchedulerError};
pub use executor::{job_fn, Executor, JobContext, JobFn, JobFuture, RetryState, RetryStates};
pub use jitter::JitterConfig;
pub use metrics::{JobMetrics, JobMetricsSnapshot, MetricsTracker};
pub use overlap::{ActiveJobs, RunGuard};
pub use registry::{JobDefinition, JobRegistry, JobStatus};
pub use run::{JobRun, SkipReason, TriggerOutcome, TriggerSource};
pub use scheduler::{parse_timezone, validate_cron_expression, ResetOutcome, SchedulerService};
pub use shutdown::ShutdownReport;
pub use sink::{
    BroadcastPublisher, ErrorKind, EventPublisher, MetricsSink, NoopMetrics, NoopPublisher,
    RunStatus, Sinks, TracingMetrics, WatchdogEvent,
};
pub use status::{HealthStatus, WatchdogHealth, WatchdogStatus, DEGRADED_OPEN_BREAKERS};
