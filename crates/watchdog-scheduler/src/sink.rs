//! Observability collaborators injected into the scheduler.
//!
//! `MetricsSink` receives counters and gauges, `EventPublisher` receives
//! fire-and-forget notifications for the real-time bus. Both are called
//! from job lifecycle callbacks and must not block.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::breaker::BreakerState;

/// Final status of a completed run, as reported to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        }
    }
}

/// Failure classification for error counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Execution,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Execution => "execution",
        }
    }
}

/// Destination for scheduler metrics.
pub trait MetricsSink: Send + Sync {
    fn record_job_run(&self, job_name: &str, status: RunStatus, duration: Duration);
    fn record_error(&self, job_name: &str, kind: ErrorKind);
    fn record_timeout(&self, job_name: &str);
    fn record_retry(&self, job_name: &str);
    fn set_success_rate(&self, job_name: &str, percent: f64);
    fn set_breaker_state(&self, job_name: &str, state: BreakerState, failure_count: u32);
    fn set_active_jobs(&self, count: usize);
}

/// Discards every metric.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_job_run(&self, _job_name: &str, _status: RunStatus, _duration: Duration) {}
    fn record_error(&self, _job_name: &str, _kind: ErrorKind) {}
    fn record_timeout(&self, _job_name: &str) {}
    fn record_retry(&self, _job_name: &str) {}
    fn set_success_rate(&self, _job_name: &str, _percent: f64) {}
    fn set_breaker_state(&self, _job_name: &str, _state: BreakerState, _failure_count: u32) {}
    fn set_active_jobs(&self, _count: usize) {}
}

/// Emits every metric as a `tracing` event on target `watchdog::metrics`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_job_run(&self, job_name: &str, status: RunStatus, duration: Duration) {
        debug!(
            target: "watchdog::metrics",
            metric = "job_runs_total",
            job = %job_name,
            status = status.as_str(),
            duration_ms = duration.as_millis() as u64
        );
    }

    fn record_error(&self, job_name: &str, kind: ErrorKind) {
        debug!(
            target: "watchdog::metrics",
            metric = "job_errors_total",
            job = %job_name,
            kind = kind.as_str()
        );
    }

    fn record_timeout(&self, job_name: &str) {
        debug!(target: "watchdog::metrics", metric = "job_timeouts_total", job = %job_name);
    }

    fn record_retry(&self, job_name: &str) {
        debug!(target: "watchdog::metrics", metric = "job_retries_total", job = %job_name);
    }

    fn set_success_rate(&self, job_name: &str, percent: f64) {
        debug!(
            target: "watchdog::metrics",
            metric = "job_success_rate",
            job = %job_name,
            value = percent
        );
    }

    fn set_breaker_state(&self, job_name: &str, state: BreakerState, failure_count: u32) {
        debug!(
            target: "watchdog::metrics",
            metric = "circuit_breaker_state",
            job = %job_name,
            state = state.as_str(),
            failure_count
        );
    }

    fn set_active_jobs(&self, count: usize) {
        debug!(target: "watchdog::metrics", metric = "active_jobs", value = count);
    }
}

/// Notification published on the real-time bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchdogEvent {
    JobCompleted {
        job_name: String,
        duration_ms: u64,
        attempts: u32,
    },
    JobFailed {
        job_name: String,
        error: Option<String>,
        timed_out: bool,
        attempts: u32,
    },
    BreakerOpened {
        job_name: String,
        failure_count: u32,
    },
    BreakerClosed {
        job_name: String,
    },
    /// Domain notification emitted by a job body.
    Notice {
        topic: String,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    },
}

impl WatchdogEvent {
    pub fn notice(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        WatchdogEvent::Notice {
            topic: topic.into(),
            payload,
            at: Utc::now(),
        }
    }
}

/// Fire-and-forget publisher for the real-time bus.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: WatchdogEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: WatchdogEvent) {}
}

/// Publisher backed by a `tokio::sync::broadcast` channel.
///
/// Publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<WatchdogEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: WatchdogEvent) {
        let _ = self.tx.send(event);
    }
}

/// Collaborators handed to the scheduler at construction.
#[derive(Clone)]
pub struct Sinks {
    pub metrics: Arc<dyn MetricsSink>,
    pub events: Arc<dyn EventPublisher>,
}

impl Sinks {
    pub fn new(metrics: Arc<dyn MetricsSink>, events: Arc<dyn EventPublisher>) -> Self {
        Self { metrics, events }
    }
}

impl Default for Sinks {
    fn default() -> Self {
        Self {
            metrics: Arc::new(NoopMetrics),
            events: Arc::new(NoopPublisher),
        }
    }
}
