//! Cumulative per-job run metrics.
//!
//! Metrics are created on a job's first completed run and live for the
//! lifetime of the scheduler. Only completed runs are counted; skipped
//! admissions never reach the tracker.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::JobRun;

/// Counters for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub run_count: u64,
    pub error_count: u64,
    pub timeout_count: u64,
    /// Retries consumed across all runs.
    pub retry_count: u64,
    pub total_duration_ms: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_attempts: Option<u32>,
}

impl JobMetrics {
    /// Mean cycle duration in milliseconds.
    pub fn avg_duration_ms(&self) -> f64 {
        if self.run_count == 0 {
            return 0.0;
        }
        self.total_duration_ms as f64 / self.run_count as f64
    }

    /// Percentage of runs that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.run_count == 0 {
            return 0.0;
        }
        (self.run_count - self.error_count) as f64 / self.run_count as f64 * 100.0
    }

    fn apply(&mut self, run: &JobRun) {
        self.run_count += 1;
        self.retry_count += u64::from(run.retries_used);
        self.total_duration_ms = self.total_duration_ms.saturating_add(run.duration_ms);
        self.last_run = Some(run.started_at);
        self.last_duration_ms = Some(run.duration_ms);
        self.last_attempts = Some(run.attempts);
        if run.success {
            self.last_error = None;
        } else {
            self.error_count += 1;
            if run.timed_out {
                self.timeout_count += 1;
            }
            self.last_error = run.error.clone();
        }
    }
}

/// Read-only view with the derived values filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetricsSnapshot {
    #[serde(flatten)]
    pub metrics: JobMetrics,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
}

impl From<&JobMetrics> for JobMetricsSnapshot {
    fn from(metrics: &JobMetrics) -> Self {
        Self {
            metrics: metrics.clone(),
            avg_duration_ms: metrics.avg_duration_ms(),
            success_rate: metrics.success_rate(),
        }
    }
}

/// Thread-safe metrics table keyed by job name.
#[derive(Default)]
pub struct MetricsTracker {
    jobs: RwLock<HashMap<String, JobMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a completed run into its job's counters and return the
    /// updated values.
    pub fn update(&self, run: &JobRun) -> JobMetrics {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let metrics = jobs.entry(run.job_name.clone()).or_default();
        metrics.apply(run);
        metrics.clone()
    }

    pub fn get(&self, job_name: &str) -> Option<JobMetrics> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, JobMetricsSnapshot> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, m)| (name.clone(), JobMetricsSnapshot::from(m)))
            .collect()
    }

    /// Start time of each job's most recent completed run.
    pub fn last_run_timestamps(&self) -> HashMap<String, DateTime<Utc>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(name, m)| m.last_run.map(|t| (name.clone(), t)))
            .collect()
    }
}
