//! End-to-end test infrastructure for the ops watchdog.
//!
//! Provides a shared TestHarness with recording sinks and scripted job
//! bodies for scenarios that exercise the scheduler as a whole.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use watchdog_scheduler::jobs::{
    AiOpsBackend, BreadcrumbStore, ForecastSummary, LearningSummary, SelfHealSummary,
};
use watchdog_scheduler::{
    BreakerConfig, BreakerState, ErrorKind, EventPublisher, JobContext, JobDefinition, JobError,
    JobPolicy, MetricsSink, RunStatus, SchedulerConfig, SchedulerService, Sinks, WatchdogEvent,
};

/// One call received by [`RecordingMetrics`].
#[derive(Debug, Clone, PartialEq)]
pub enum MetricCall {
    JobRun { job: String, status: RunStatus },
    Error { job: String, kind: ErrorKind },
    Timeout { job: String },
    Retry { job: String },
    SuccessRate { job: String, percent: f64 },
    Breaker { job: String, state: BreakerState, failures: u32 },
    ActiveJobs(usize),
}

/// Metrics sink that keeps every call for later assertions.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    calls: Mutex<Vec<MetricCall>>,
}

impl RecordingMetrics {
    pub fn calls(&self) -> Vec<MetricCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&MetricCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn push(&self, call: MetricCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_job_run(&self, job_name: &str, status: RunStatus, _duration: Duration) {
        self.push(MetricCall::JobRun {
            job: job_name.into(),
            status,
        });
    }

    fn record_error(&self, job_name: &str, kind: ErrorKind) {
        self.push(MetricCall::Error {
            job: job_name.into(),
            kind,
        });
    }

    fn record_timeout(&self, job_name: &str) {
        self.push(MetricCall::Timeout {
            job: job_name.into(),
        });
    }

    fn record_retry(&self, job_name: &str) {
        self.push(MetricCall::Retry {
            job: job_name.into(),
        });
    }

    fn set_success_rate(&self, job_name: &str, percent: f64) {
        self.push(MetricCall::SuccessRate {
            job: job_name.into(),
            percent,
        });
    }

    fn set_breaker_state(&self, job_name: &str, state: BreakerState, failure_count: u32) {
        self.push(MetricCall::Breaker {
            job: job_name.into(),
            state,
            failures: failure_count,
        });
    }

    fn set_active_jobs(&self, count: usize) {
        self.push(MetricCall::ActiveJobs(count));
    }
}

/// Publisher that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<WatchdogEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<WatchdogEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event type tags in publish order (`job_completed`, `breaker_opened`, ...).
    pub fn kinds(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| {
                serde_json::to_value(e).unwrap()["type"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: WatchdogEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Shared test harness for E2E tests.
pub struct TestHarness {
    pub scheduler: SchedulerService,
    pub metrics: Arc<RecordingMetrics>,
    pub events: Arc<RecordingPublisher>,
}

impl TestHarness {
    /// Scheduler with recording sinks and a single-attempt default policy.
    pub async fn new() -> Self {
        Self::with_config(SchedulerConfig {
            default_policy: single_attempt(),
            ..Default::default()
        })
        .await
    }

    /// Scheduler whose breakers reopen for probes after `reset_timeout`.
    pub async fn with_breaker(failure_threshold: u32, reset_timeout_secs: u64) -> Self {
        Self::with_config(SchedulerConfig {
            breaker: BreakerConfig {
                failure_threshold,
                reset_timeout_secs,
                half_open_max_attempts: 1,
            },
            default_policy: single_attempt(),
            ..Default::default()
        })
        .await
    }

    pub async fn with_config(config: SchedulerConfig) -> Self {
        let metrics = Arc::new(RecordingMetrics::default());
        let events = Arc::new(RecordingPublisher::default());
        let sinks = Sinks::new(metrics.clone(), events.clone());
        let scheduler = SchedulerService::new(config, sinks)
            .await
            .expect("Failed to create scheduler");
        Self {
            scheduler,
            metrics,
            events,
        }
    }
}

/// Default policy for jobs registered without one: one 5s attempt.
pub fn single_attempt() -> JobPolicy {
    JobPolicy::no_retry(Duration::from_secs(5))
}

/// Job body that fails its first `failures` invocations, then succeeds.
///
/// Counts every invocation, across runs.
#[derive(Debug, Clone, Default)]
pub struct Scripted {
    pub calls: Arc<AtomicU32>,
    pub failures: Arc<AtomicU32>,
}

impl Scripted {
    pub fn failing(failures: u32) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures: Arc::new(AtomicU32::new(failures)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every further invocation succeed.
    pub fn heal(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn definition(&self, name: &str) -> JobDefinition {
        let script = self.clone();
        JobDefinition::new(name, move |_ctx: JobContext| {
            let script = script.clone();
            async move {
                script.calls.fetch_add(1, Ordering::SeqCst);
                let remaining = script.failures.load(Ordering::SeqCst);
                if remaining > 0 {
                    script.failures.store(remaining - 1, Ordering::SeqCst);
                    return Err(JobError::failed("scripted failure"));
                }
                Ok(())
            }
        })
    }
}

/// Job body that sleeps for `duration` on every attempt.
pub fn sleeping_job(name: &str, duration: Duration, calls: Arc<AtomicU32>) -> JobDefinition {
    JobDefinition::new(name, move |_ctx: JobContext| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(duration).await;
            Ok(())
        }
    })
}

/// In-process stand-in for the application backend.
///
/// `governance_failures` makes the first N score requests fail.
#[derive(Debug)]
pub struct StubBackend {
    pub governance_failures: AtomicU32,
    pub score: f64,
    pub forecast_delay: Duration,
}

impl Default for StubBackend {
    fn default() -> Self {
        Self {
            governance_failures: AtomicU32::new(0),
            score: 80.0,
            forecast_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl AiOpsBackend for StubBackend {
    async fn generate_forecasts(&self) -> Result<ForecastSummary, JobError> {
        tokio::time::sleep(self.forecast_delay).await;
        Ok(ForecastSummary {
            forecasts_generated: 5,
            tenants_processed: 1,
        })
    }

    async fn run_learning_cycle(&self) -> Result<LearningSummary, JobError> {
        Ok(LearningSummary::default())
    }

    async fn compute_governance_score(&self) -> Result<f64, JobError> {
        let remaining = self.governance_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.governance_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(JobError::Backend("score service unavailable".into()));
        }
        Ok(self.score)
    }

    async fn self_heal(&self) -> Result<SelfHealSummary, JobError> {
        Ok(SelfHealSummary::default())
    }
}

/// Breadcrumb store that keeps `(job_name, action)` pairs.
#[derive(Debug, Default)]
pub struct MemoryBreadcrumbs {
    rows: Mutex<Vec<(String, String)>>,
}

impl MemoryBreadcrumbs {
    pub fn rows(&self) -> Vec<(String, String)> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl BreadcrumbStore for MemoryBreadcrumbs {
    async fn execute(&self, _sql: &str, params: &[serde_json::Value]) -> Result<u64, JobError> {
        let text = |i: usize| {
            params
                .get(i)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        self.rows.lock().unwrap().push((text(0), text(1)));
        Ok(1)
    }
}
