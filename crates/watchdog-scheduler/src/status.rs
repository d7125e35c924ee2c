//! Read-only views of the scheduler for operators and health probes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::breaker::BreakerEntry;
use crate::executor::RetryState;
use crate::metrics::JobMetricsSnapshot;
use crate::registry::JobStatus;
use crate::scheduler::SchedulerService;

/// Open breakers at or above which health reports `degraded`.
pub const DEGRADED_OPEN_BREAKERS: usize = 3;

/// Snapshot of the whole scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogStatus {
    pub is_running: bool,
    pub is_shutting_down: bool,
    pub active_jobs: Vec<String>,
    pub job_metrics: HashMap<String, JobMetricsSnapshot>,
    pub circuit_breakers: HashMap<String, BreakerEntry>,
    pub paused_jobs: Vec<String>,
    pub last_run_timestamps: HashMap<String, DateTime<Utc>>,
    pub retry_states: HashMap<String, RetryState>,
    pub jobs: Vec<JobStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Health summary. `degraded` never fails readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogHealth {
    pub status: HealthStatus,
    pub active_job_count: usize,
    pub is_shutting_down: bool,
    pub open_circuit_breakers: usize,
}

impl SchedulerService {
    pub fn watchdog_status(&self) -> WatchdogStatus {
        let inner = &self.inner;
        let active_jobs = inner.active.names();
        let jobs = inner
            .registry
            .statuses(&inner.config.default_policy)
            .into_iter()
            .map(|mut status| {
                status.is_running = active_jobs.contains(&status.job_name);
                status
            })
            .collect();

        WatchdogStatus {
            is_running: self.is_running(),
            is_shutting_down: self.is_shutting_down(),
            job_metrics: inner.metrics.snapshot(),
            circuit_breakers: inner.breakers.status(),
            paused_jobs: inner.registry.paused_jobs(),
            last_run_timestamps: inner.metrics.last_run_timestamps(),
            retry_states: inner.executor.retry_states().snapshot(),
            active_jobs,
            jobs,
        }
    }

    pub fn health(&self) -> WatchdogHealth {
        let open = self.inner.breakers.open_count();
        WatchdogHealth {
            status: if open >= DEGRADED_OPEN_BREAKERS {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            active_job_count: self.inner.active.len(),
            is_shutting_down: self.is_shutting_down(),
            open_circuit_breakers: open,
        }
    }
}
