//! Outcome types for one admitted run and for admission skips.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::breaker::BreakerState;

/// What caused a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// A cron tick
    Schedule,
    /// `trigger_job` from an operator or the HTTP layer
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Schedule => "schedule",
            TriggerSource::Manual => "manual",
        }
    }
}

/// Summary of one execution cycle (one or more attempts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub job_name: String,
    pub run_id: Uuid,
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Wall-clock time of the whole cycle, retry sleeps included.
    pub duration_ms: u64,
    /// Attempts actually made.
    pub attempts: u32,
    pub retries_used: u32,
    pub success: bool,
    /// Whether the last attempt hit its timeout.
    pub timed_out: bool,
    /// Error of the last failed attempt.
    pub error: Option<String>,
    /// The cycle ended without success, either with every attempt spent or
    /// with retries cut short by shutdown.
    pub exhausted_retries: bool,
}

impl JobRun {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Why a run was not admitted. Skips are not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Shutdown,
    AlreadyRunning,
    Paused,
    CircuitBreaker {
        state: BreakerState,
        /// Remaining cooldown in milliseconds, when known.
        retry_in_ms: Option<u64>,
    },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Shutdown => "shutdown",
            SkipReason::AlreadyRunning => "already_running",
            SkipReason::Paused => "paused",
            SkipReason::CircuitBreaker { .. } => "circuit_breaker",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a scheduled tick or a manual trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Completed(JobRun),
    Skipped {
        job_name: String,
        #[serde(flatten)]
        reason: SkipReason,
    },
}

impl TriggerOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TriggerOutcome::Skipped { .. })
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            TriggerOutcome::Skipped { reason, .. } => Some(*reason),
            TriggerOutcome::Completed(_) => None,
        }
    }

    pub fn run(&self) -> Option<&JobRun> {
        match self {
            TriggerOutcome::Completed(run) => Some(run),
            TriggerOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.run().map(|r| r.success).unwrap_or(false)
    }
}
