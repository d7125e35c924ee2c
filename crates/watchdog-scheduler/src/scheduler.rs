//! Scheduler service wrapper around tokio-cron-scheduler.
//!
//! Binds registered jobs to timezone-aware cron triggers and runs every
//! admission (scheduled or manual) through the same path:
//! shutdown check, active set, pause flag, circuit breaker, executor.
//! The result of an admitted run is recorded exactly once into the
//! metrics tracker, the breaker and the sinks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::breaker::{BreakerState, CircuitBreakers};
use crate::executor::Executor;
use crate::jitter::wait_jitter;
use crate::metrics::MetricsTracker;
use crate::overlap::ActiveJobs;
use crate::registry::{JobDefinition, JobRegistry};
use crate::run::{JobRun, SkipReason, TriggerOutcome, TriggerSource};
use crate::shutdown::ShutdownReport;
use crate::sink::{ErrorKind, RunStatus, Sinks, WatchdogEvent};
use crate::{SchedulerConfig, SchedulerError};

/// Validate a cron expression.
///
/// The expression should use 6-field format:
/// second minute hour day-of-month month day-of-week.
///
/// # Errors
///
/// Returns `SchedulerError::InvalidCron` if the expression is not valid.
///
/// # Example
///
/// ```
/// use watchdog_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 0 2 * * *").is_ok());   // 02:00 daily
/// assert!(validate_cron_expression("0 */15 * * * *").is_ok()); // every 15 minutes
///
/// assert!(validate_cron_expression("invalid").is_err());
/// assert!(validate_cron_expression("").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    match Job::new_async(expr, |_uuid, _lock| Box::pin(async {})) {
        Ok(_) => Ok(()),
        Err(e) => Err(SchedulerError::InvalidCron(format!("'{}': {}", expr, e))),
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(tz_str: &str) -> Result<Tz, SchedulerError> {
    tz_str
        .parse()
        .map_err(|_| SchedulerError::InvalidTimezone(tz_str.to_string()))
}

/// Result of a manual circuit breaker reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    /// `false` when the job had no breaker record.
    pub success: bool,
    pub job: String,
}

pub(crate) struct Inner {
    pub(crate) config: SchedulerConfig,
    pub(crate) default_tz: Tz,
    pub(crate) registry: JobRegistry,
    pub(crate) breakers: CircuitBreakers,
    pub(crate) metrics: MetricsTracker,
    pub(crate) executor: Executor,
    pub(crate) active: ActiveJobs,
    pub(crate) sinks: Sinks,
    pub(crate) shutdown_token: CancellationToken,
    pub(crate) is_running: AtomicBool,
    pub(crate) is_shutting_down: AtomicBool,
    /// Set once the cron tick loop has been started.
    pub(crate) cron_started: AtomicBool,
    pub(crate) scheduler: JobScheduler,
    /// Completion of the first graceful shutdown, shared with later callers.
    pub(crate) shutdown_done: Mutex<Option<watch::Receiver<Option<ShutdownReport>>>>,
}

/// The watchdog scheduler.
///
/// Cheap to clone; clones share the same registry, breakers and metrics.
///
/// # Example
///
/// ```ignore
/// use watchdog_scheduler::{JobDefinition, SchedulerConfig, SchedulerService, Sinks};
///
/// let scheduler = SchedulerService::new(SchedulerConfig::default(), Sinks::default()).await?;
/// scheduler.register(
///     JobDefinition::new("self_heal", |_ctx| async { Ok(()) })
///         .with_schedule("0 */15 * * * *"),
/// )?;
/// scheduler.start().await?;
///
/// let outcome = scheduler.trigger_job("self_heal").await?;
/// assert!(outcome.is_success());
///
/// scheduler.graceful_shutdown(None).await;
/// ```
#[derive(Clone)]
pub struct SchedulerService {
    pub(crate) inner: Arc<Inner>,
}

impl SchedulerService {
    /// Create a scheduler with the given configuration and sinks.
    ///
    /// Triggers stay inactive until `start()`.
    pub async fn new(config: SchedulerConfig, sinks: Sinks) -> Result<Self, SchedulerError> {
        let default_tz = config.parse_timezone()?;
        config
            .default_policy
            .validate()
            .map_err(SchedulerError::Scheduler)?;

        let scheduler = JobScheduler::new().await?;
        let shutdown_token = CancellationToken::new();
        let executor = Executor::new(
            shutdown_token.clone(),
            sinks.metrics.clone(),
            sinks.events.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                breakers: CircuitBreakers::new(config.breaker.clone()),
                config,
                default_tz,
                registry: JobRegistry::new(),
                metrics: MetricsTracker::new(),
                executor,
                active: ActiveJobs::new(sinks.metrics.clone()),
                sinks,
                shutdown_token,
                is_running: AtomicBool::new(false),
                is_shutting_down: AtomicBool::new(false),
                cron_started: AtomicBool::new(false),
                scheduler,
                shutdown_done: Mutex::new(None),
            }),
        })
    }

    /// Register a job definition.
    ///
    /// # Errors
    ///
    /// - `InvalidCron` / `InvalidTimezone` for a bad schedule
    /// - `DuplicateJob` if the name is taken
    /// - `AlreadyRunning` after `start()`, `ShuttingDown` after shutdown began
    pub fn register(&self, definition: JobDefinition) -> Result<(), SchedulerError> {
        if self.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        if let Some(cron_expr) = &definition.schedule {
            validate_cron_expression(cron_expr)?;
        }
        if let Some(tz) = &definition.timezone {
            parse_timezone(tz)?;
        }
        if let Some(policy) = &definition.policy {
            policy.validate().map_err(SchedulerError::Scheduler)?;
        }

        let name = definition.name.clone();
        let schedule = definition.schedule.clone();
        self.inner.registry.insert(definition)?;
        info!(job = %name, schedule = schedule.as_deref().unwrap_or("manual"), "Job registered");
        Ok(())
    }

    /// Activate the cron trigger of every scheduled job.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        if self.inner.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        if let Err(e) = self.activate_triggers().await {
            self.deactivate_triggers().await;
            self.inner.is_running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        if !self.inner.cron_started.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.inner.scheduler.start().await {
                self.inner.cron_started.store(false, Ordering::SeqCst);
                self.deactivate_triggers().await;
                self.inner.is_running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }

        info!(jobs = self.inner.registry.job_count(), "Scheduler started");
        Ok(())
    }

    /// Deactivate cron triggers without draining running jobs.
    ///
    /// Manual triggers keep working; `start()` re-activates the triggers.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if !self.inner.is_running.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }
        self.deactivate_triggers().await;
        info!("Scheduler stopped");
        Ok(())
    }

    async fn activate_triggers(&self) -> Result<(), SchedulerError> {
        for definition in self.inner.registry.definitions() {
            let Some(cron_expr) = definition.schedule.clone() else {
                continue;
            };
            let tz = match &definition.timezone {
                Some(tz) => parse_timezone(tz)?,
                None => self.inner.default_tz,
            };

            let weak = Arc::downgrade(&self.inner);
            let job_name = definition.name.clone();
            let job = Job::new_async_tz(cron_expr.as_str(), tz, move |uuid, mut lock| {
                let weak: Weak<Inner> = weak.clone();
                let name = job_name.clone();
                Box::pin(async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if let Ok(next) = lock.next_tick_for_job(uuid).await {
                        inner.registry.set_next_run(&name, next);
                    }
                    inner.scheduled_tick(&name).await;
                })
            })
            .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

            let uuid = self.inner.scheduler.add(job).await?;
            self.inner.registry.set_cron_id(&definition.name, Some(uuid));

            let mut scheduler = self.inner.scheduler.clone();
            if let Ok(next) = scheduler.next_tick_for_job(uuid).await {
                self.inner.registry.set_next_run(&definition.name, next);
            }
            info!(
                job = %definition.name,
                uuid = %uuid,
                cron = %cron_expr,
                timezone = %tz.name(),
                "Cron trigger activated"
            );
        }
        Ok(())
    }

    pub(crate) async fn deactivate_triggers(&self) {
        for (name, uuid) in self.inner.registry.take_cron_ids() {
            if let Err(e) = self.inner.scheduler.remove(&uuid).await {
                warn!(job = %name, error = %e, "Failed to remove cron trigger");
            } else {
                debug!(job = %name, "Cron trigger removed");
            }
        }
    }

    /// Run a job now, through the same admission checks as a scheduled
    /// tick. Waits for the run cycle to finish.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::JobNotFound` for an unknown name. Skips are
    /// reported as [`TriggerOutcome::Skipped`], not as errors.
    pub async fn trigger_job(&self, job_name: &str) -> Result<TriggerOutcome, SchedulerError> {
        let definition = self
            .inner
            .registry
            .get(job_name)
            .ok_or_else(|| SchedulerError::JobNotFound(job_name.to_string()))?;
        info!(job = %job_name, "Manual trigger");
        Ok(self.inner.admit_and_run(&definition, TriggerSource::Manual).await)
    }

    pub fn pause_job(&self, job_name: &str) -> Result<(), SchedulerError> {
        self.inner.registry.set_paused(job_name, true)?;
        info!(job = %job_name, "Job paused");
        Ok(())
    }

    pub fn resume_job(&self, job_name: &str) -> Result<(), SchedulerError> {
        self.inner.registry.set_paused(job_name, false)?;
        info!(job = %job_name, "Job resumed");
        Ok(())
    }

    /// Force a job's breaker back to closed.
    pub fn reset_circuit_breaker(&self, job_name: &str) -> ResetOutcome {
        let success = self.inner.breakers.reset(job_name);
        if success {
            self.inner
                .sinks
                .metrics
                .set_breaker_state(job_name, BreakerState::Closed, 0);
            self.inner.sinks.events.publish(WatchdogEvent::BreakerClosed {
                job_name: job_name.to_string(),
            });
        }
        ResetOutcome {
            success,
            job: job_name.to_string(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.inner.breakers
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.inner.metrics
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Token cancelled when graceful shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown_token.clone()
    }

    /// Whether cron triggers are active.
    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down.load(Ordering::SeqCst)
    }
}

impl Inner {
    async fn scheduled_tick(self: &Arc<Self>, job_name: &str) {
        let Some(definition) = self.registry.get(job_name) else {
            warn!(job = %job_name, "Cron tick for unregistered job");
            return;
        };

        if definition.jitter.is_enabled()
            && !wait_jitter(definition.jitter, &self.shutdown_token).await
        {
            debug!(job = %job_name, "Shutdown during jitter, tick dropped");
            return;
        }

        let outcome = self.admit_and_run(&definition, TriggerSource::Schedule).await;
        if let TriggerOutcome::Skipped { reason, .. } = outcome {
            debug!(job = %job_name, reason = %reason, "Scheduled tick skipped");
        }
    }

    /// Admit a run and wait for its cycle.
    ///
    /// Admission is synchronous. Once admitted, the run cycle lives in its
    /// own task, so dropping the returned future never loses the result:
    /// the breaker and metrics are still updated when the work finishes.
    pub(crate) async fn admit_and_run(
        self: &Arc<Self>,
        definition: &Arc<JobDefinition>,
        trigger: TriggerSource,
    ) -> TriggerOutcome {
        let job_name = definition.name.as_str();
        let skipped = |reason: SkipReason| {
            debug!(job = %job_name, reason = %reason, "Run skipped");
            TriggerOutcome::Skipped {
                job_name: job_name.to_string(),
                reason,
            }
        };

        if self.shutdown_token.is_cancelled() {
            return skipped(SkipReason::Shutdown);
        }

        let Some(guard) = self.active.try_acquire(job_name) else {
            return skipped(SkipReason::AlreadyRunning);
        };

        // Shutdown may have drained the active set between the check above
        // and the acquire. Both go through the set's lock.
        if self.shutdown_token.is_cancelled() {
            return skipped(SkipReason::Shutdown);
        }

        if self.registry.is_paused(job_name) {
            return skipped(SkipReason::Paused);
        }

        let decision = self.breakers.may_run(job_name);
        if !decision.allowed {
            return skipped(SkipReason::CircuitBreaker {
                state: decision.state,
                retry_in_ms: decision.retry_in.map(|d| d.as_millis() as u64),
            });
        }

        let policy = definition
            .policy
            .clone()
            .unwrap_or_else(|| self.config.default_policy.clone());

        info!(job = %job_name, trigger = trigger.as_str(), "Job started");
        let inner = Arc::clone(self);
        let cycle_definition = Arc::clone(definition);
        let cycle = tokio::spawn(async move {
            let definition = cycle_definition;
            let run = inner
                .executor
                .run(&definition.name, &policy, &definition.work, trigger)
                .await;
            inner.record(&run);
            drop(guard);
            run
        });

        match cycle.await {
            Ok(run) => TriggerOutcome::Completed(run),
            Err(e) => {
                error!(job = %job_name, error = %e, "Run cycle aborted");
                let now = Utc::now();
                TriggerOutcome::Completed(JobRun {
                    job_name: job_name.to_string(),
                    run_id: Uuid::new_v4(),
                    trigger,
                    started_at: now,
                    finished_at: now,
                    duration_ms: 0,
                    attempts: 0,
                    retries_used: 0,
                    success: false,
                    timed_out: false,
                    error: Some(format!("run cycle aborted: {}", e)),
                    exhausted_retries: false,
                })
            }
        }
    }

    fn record(&self, run: &JobRun) {
        let job_name = run.job_name.as_str();
        let sink = &self.sinks.metrics;

        let metrics = self.metrics.update(run);
        let status = if run.success {
            RunStatus::Success
        } else {
            RunStatus::Failure
        };
        sink.record_job_run(job_name, status, run.duration());
        if !run.success {
            let kind = if run.timed_out {
                ErrorKind::Timeout
            } else {
                ErrorKind::Execution
            };
            sink.record_error(job_name, kind);
        }
        sink.set_success_rate(job_name, metrics.success_rate());

        let before = self.breakers.state(job_name);
        let (state, failure_count) = self.breakers.record_result(job_name, run.success);
        sink.set_breaker_state(job_name, state, failure_count);
        if state == BreakerState::Open && before != BreakerState::Open {
            self.sinks.events.publish(WatchdogEvent::BreakerOpened {
                job_name: job_name.to_string(),
                failure_count,
            });
        } else if state == BreakerState::Closed && before != BreakerState::Closed {
            self.sinks.events.publish(WatchdogEvent::BreakerClosed {
                job_name: job_name.to_string(),
            });
        }

        if run.success {
            info!(
                job = %job_name,
                duration_ms = run.duration_ms,
                attempts = run.attempts,
                "Job completed"
            );
            self.sinks.events.publish(WatchdogEvent::JobCompleted {
                job_name: job_name.to_string(),
                duration_ms: run.duration_ms,
                attempts: run.attempts,
            });
        } else {
            error!(
                job = %job_name,
                duration_ms = run.duration_ms,
                attempts = run.attempts,
                timed_out = run.timed_out,
                exhausted_retries = run.exhausted_retries,
                error = run.error.as_deref().unwrap_or_default(),
                "Job failed"
            );
            self.sinks.events.publish(WatchdogEvent::JobFailed {
                job_name: job_name.to_string(),
                error: run.error.clone(),
                timed_out: run.timed_out,
                attempts: run.attempts,
            });
        }
    }
}
