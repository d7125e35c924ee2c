//! Job registry: definitions, pause flags and schedule bookkeeping.
//!
//! The `JobRegistry` maps each job name to the definition supplied at
//! registration time. Definitions are immutable once registered; only the
//! pause flag and the schedule bookkeeping (cron job id, next tick) change
//! afterwards.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JobPolicy;
use crate::executor::{job_fn, JobContext, JobFn};
use crate::jitter::JitterConfig;
use crate::{JobError, SchedulerError};

/// Immutable configuration of a named job.
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    /// 6-field cron expression. `None` for manual-only jobs.
    pub schedule: Option<String>,
    /// IANA timezone for the schedule; the scheduler default when `None`.
    pub timezone: Option<String>,
    /// Execution policy; the scheduler default when `None`.
    pub policy: Option<JobPolicy>,
    /// Random start delay applied to scheduled ticks only.
    pub jitter: JitterConfig,
    pub work: JobFn,
}

impl JobDefinition {
    /// Define a job from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule: None,
            timezone: None,
            policy: None,
            jitter: JitterConfig::none(),
            work: job_fn(work),
        }
    }

    pub fn with_schedule(mut self, cron_expr: impl Into<String>) -> Self {
        self.schedule = Some(cron_expr.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_policy(mut self, policy: JobPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_jitter(mut self, jitter: JitterConfig) -> Self {
        self.jitter = jitter;
        self
    }
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("timezone", &self.timezone)
            .field("policy", &self.policy)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

/// Public view of a registered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub schedule: Option<String>,
    pub timezone: Option<String>,
    /// Effective policy (the job's own or the scheduler default).
    pub policy: JobPolicy,
    /// Next scheduled tick, when the cron trigger is active.
    pub next_run: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub is_paused: bool,
}

struct RegisteredJob {
    definition: Arc<JobDefinition>,
    paused: bool,
    cron_id: Option<Uuid>,
    next_run: Option<DateTime<Utc>>,
}

/// Registry of job definitions.
///
/// # Example
///
/// ```
/// use watchdog_scheduler::{JobDefinition, JobRegistry};
///
/// let registry = JobRegistry::new();
/// registry
///     .insert(JobDefinition::new("self_heal", |_ctx| async { Ok(()) }))
///     .unwrap();
///
/// registry.set_paused("self_heal", true).unwrap();
/// assert!(registry.is_paused("self_heal"));
/// ```
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, RegisteredJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition. Names are unique.
    pub fn insert(&self, definition: JobDefinition) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&definition.name) {
            return Err(SchedulerError::DuplicateJob(definition.name));
        }
        jobs.insert(
            definition.name.clone(),
            RegisteredJob {
                definition: Arc::new(definition),
                paused: false,
                cron_id: None,
                next_run: None,
            },
        );
        Ok(())
    }

    pub fn get(&self, job_name: &str) -> Option<Arc<JobDefinition>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .map(|j| j.definition.clone())
    }

    /// All definitions, in name order.
    pub fn definitions(&self) -> Vec<Arc<JobDefinition>> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut defs: Vec<_> = jobs.values().map(|j| j.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn set_paused(&self, job_name: &str, paused: bool) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let job = jobs
            .get_mut(job_name)
            .ok_or_else(|| SchedulerError::JobNotFound(job_name.to_string()))?;
        job.paused = paused;
        Ok(())
    }

    /// Returns `false` if the job is not registered.
    pub fn is_paused(&self, job_name: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .map(|j| j.paused)
            .unwrap_or(false)
    }

    /// Names of paused jobs, sorted.
    pub fn paused_jobs(&self) -> Vec<String> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = jobs
            .iter()
            .filter(|(_, j)| j.paused)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn set_cron_id(&self, job_name: &str, cron_id: Option<Uuid>) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get_mut(job_name) {
            job.cron_id = cron_id;
            if cron_id.is_none() {
                job.next_run = None;
            }
        }
    }

    /// Cron ids of every active trigger, cleared from the registry.
    pub(crate) fn take_cron_ids(&self) -> Vec<(String, Uuid)> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.iter_mut()
            .filter_map(|(name, job)| {
                job.next_run = None;
                job.cron_id.take().map(|id| (name.clone(), id))
            })
            .collect()
    }

    pub fn set_next_run(&self, job_name: &str, next: Option<DateTime<Utc>>) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get_mut(job_name) {
            job.next_run = next;
        }
    }

    pub fn next_run(&self, job_name: &str) -> Option<DateTime<Utc>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .and_then(|j| j.next_run)
    }

    /// Status of every job, in name order. `is_running` is left `false`;
    /// the scheduler fills it from its active set.
    pub fn statuses(&self, default_policy: &JobPolicy) -> Vec<JobStatus> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = jobs
            .values()
            .map(|j| JobStatus {
                job_name: j.definition.name.clone(),
                schedule: j.definition.schedule.clone(),
                timezone: j.definition.timezone.clone(),
                policy: j
                    .definition
                    .policy
                    .clone()
                    .unwrap_or_else(|| default_policy.clone()),
                next_run: j.next_run,
                is_running: false,
                is_paused: j.paused,
            })
            .collect();
        out.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        out
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_name)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
