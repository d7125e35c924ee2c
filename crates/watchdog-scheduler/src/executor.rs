//! Per-job executor: timeout enforcement and retry with exponential backoff.
//!
//! Every attempt runs the job body as its own task and races it against the
//! policy timeout. A timed-out attempt is abandoned, not aborted: its
//! cancellation token is tripped so cooperative bodies can stop, but any
//! write already in flight may still land after the executor moved on.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::JobPolicy;
use crate::error::JobError;
use crate::run::{JobRun, TriggerSource};
use crate::sink::{EventPublisher, MetricsSink, WatchdogEvent};

/// Boxed future returned by a job body.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send>>;

/// A registered job body.
pub type JobFn = Arc<dyn Fn(JobContext) -> JobFuture + Send + Sync>;

/// Wrap an async closure as a [`JobFn`].
pub fn job_fn<F, Fut>(f: F) -> JobFn
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Per-attempt context handed to a job body.
#[derive(Clone)]
pub struct JobContext {
    pub job_name: String,
    pub run_id: Uuid,
    /// 1-indexed attempt number within the run.
    pub attempt: u32,
    pub trigger: TriggerSource,
    /// Tripped when this attempt times out.
    pub cancellation_token: CancellationToken,
    events: Arc<dyn EventPublisher>,
}

impl JobContext {
    /// Publish a domain notification on the real-time bus.
    pub fn publish(&self, event: WatchdogEvent) {
        self.events.publish(event);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

/// Transient record of the latest failed attempt of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub attempts: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub last_error: String,
    pub timed_out: bool,
}

/// Retry state per job. Cleared when a run succeeds.
#[derive(Default)]
pub struct RetryStates {
    states: RwLock<HashMap<String, RetryState>>,
}

impl RetryStates {
    fn record(&self, job_name: &str, state: RetryState) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_name.to_string(), state);
    }

    fn clear(&self, job_name: &str) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_name);
    }

    pub fn get(&self, job_name: &str) -> Option<RetryState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, RetryState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct AttemptFailure {
    message: String,
    timed_out: bool,
}

/// Runs job bodies under their policy.
pub struct Executor {
    shutdown: CancellationToken,
    retry_states: RetryStates,
    metrics: Arc<dyn MetricsSink>,
    events: Arc<dyn EventPublisher>,
}

impl Executor {
    pub fn new(
        shutdown: CancellationToken,
        metrics: Arc<dyn MetricsSink>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            shutdown,
            retry_states: RetryStates::default(),
            metrics,
            events,
        }
    }

    pub fn retry_states(&self) -> &RetryStates {
        &self.retry_states
    }

    /// Execute one run cycle. Never fails; every outcome is a [`JobRun`].
    ///
    /// Makes up to `policy.max_retries + 1` attempts. After a failed
    /// attempt `k` it sleeps `retry_delay * backoff_multiplier^(k-1)`.
    /// Shutdown stops further attempts and interrupts the backoff sleep,
    /// but never the attempt in progress.
    pub async fn run(
        &self,
        job_name: &str,
        policy: &JobPolicy,
        work: &JobFn,
        trigger: TriggerSource,
    ) -> JobRun {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let max_attempts = policy.max_attempts();

        let mut attempts = 0;
        let mut timed_out = false;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 && self.shutdown.is_cancelled() {
                info!(job = %job_name, attempt, "Shutdown requested, abandoning retries");
                break;
            }
            attempts = attempt;

            let ctx = JobContext {
                job_name: job_name.to_string(),
                run_id,
                attempt,
                trigger,
                cancellation_token: CancellationToken::new(),
                events: self.events.clone(),
            };

            match self.attempt(policy, work, ctx).await {
                Ok(()) => {
                    self.retry_states.clear(job_name);
                    debug!(job = %job_name, attempt, "Job attempt succeeded");
                    return JobRun {
                        job_name: job_name.to_string(),
                        run_id,
                        trigger,
                        started_at,
                        finished_at: Utc::now(),
                        duration_ms: clock.elapsed().as_millis() as u64,
                        attempts,
                        retries_used: attempts - 1,
                        success: true,
                        timed_out: false,
                        error: None,
                        exhausted_retries: false,
                    };
                }
                Err(failure) => {
                    timed_out = failure.timed_out;
                    if timed_out {
                        self.metrics.record_timeout(job_name);
                    }
                    self.retry_states.record(
                        job_name,
                        RetryState {
                            attempts: attempt,
                            last_attempt_at: Utc::now(),
                            last_error: failure.message.clone(),
                            timed_out,
                        },
                    );
                    last_error = Some(failure.message);

                    if attempt < max_attempts {
                        let delay = policy.delay_after_attempt(attempt);
                        warn!(
                            job = %job_name,
                            attempt,
                            max_attempts,
                            timed_out,
                            delay_ms = delay.as_millis() as u64,
                            error = last_error.as_deref().unwrap_or_default(),
                            "Job attempt failed, retrying"
                        );

                        tokio::select! {
                            biased;
                            _ = self.shutdown.cancelled() => {
                                info!(
                                    job = %job_name,
                                    attempt,
                                    "Shutdown during retry backoff, abandoning retries"
                                );
                                break;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        self.metrics.record_retry(job_name);
                    }
                }
            }
        }

        JobRun {
            job_name: job_name.to_string(),
            run_id,
            trigger,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            attempts,
            retries_used: attempts.saturating_sub(1),
            success: false,
            timed_out,
            error: last_error,
            exhausted_retries: true,
        }
    }

    async fn attempt(
        &self,
        policy: &JobPolicy,
        work: &JobFn,
        ctx: JobContext,
    ) -> Result<(), AttemptFailure> {
        let token = ctx.cancellation_token.clone();
        let timeout = policy.timeout();
        let mut handle = tokio::spawn(work(ctx));

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(AttemptFailure {
                message: err.to_string(),
                timed_out: false,
            }),
            Ok(Err(join_err)) => Err(AttemptFailure {
                message: JobError::Panicked(join_err.to_string()).to_string(),
                timed_out: false,
            }),
            Err(_) => {
                // Stop waiting; the detached task keeps running.
                token.cancel();
                Err(AttemptFailure {
                    message: format!("timed out after {}ms", timeout.as_millis()),
                    timed_out: true,
                })
            }
        }
    }
}
