//! Built-in AI-ops job definitions.
//!
//! These jobs are registered by the daemon and run against the main
//! application through two narrow collaborators:
//!
//! - [`AiOpsBackend`]: the application's forecasting, learning,
//!   governance and self-heal entry points
//! - [`BreadcrumbStore`]: the audit table every job writes one row to
//!
//! # Available Jobs
//!
//! - **ai_forecast**: regenerate demand forecasts
//! - **ai_learning**: fold recent outcomes back into the models
//! - **governance_score**: recompute the AI governance score
//! - **self_heal**: detect and repair stuck operational state

pub mod forecast;
pub mod governance;
pub mod learning;
pub mod self_heal;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{JobError, SchedulerError, SchedulerService};

pub use forecast::{create_forecast_job, ForecastJobConfig, FORECAST_JOB};
pub use governance::{
    create_governance_job, GovernanceJobConfig, GOVERNANCE_JOB, GOVERNANCE_SCORE_TOPIC,
};
pub use learning::{create_learning_job, LearningJobConfig, LEARNING_JOB};
pub use self_heal::{create_self_heal_job, SelfHealJobConfig, SELF_HEAL_JOB};

use std::sync::Arc;

/// Insert statement for one audit row.
pub const BREADCRUMB_INSERT_SQL: &str =
    "INSERT INTO ai_ops_breadcrumbs (job_name, action, details, created_at) VALUES (?, ?, ?, ?)";

/// Result of a forecast generation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub forecasts_generated: u64,
    #[serde(default)]
    pub tenants_processed: u64,
}

/// Result of a learning cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningSummary {
    pub models_updated: u64,
    #[serde(default)]
    pub samples_processed: u64,
}

/// Result of a self-heal pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfHealSummary {
    pub issues_found: u64,
    pub issues_fixed: u64,
}

/// Entry points of the main application used by the built-in jobs.
#[async_trait]
pub trait AiOpsBackend: Send + Sync {
    async fn generate_forecasts(&self) -> Result<ForecastSummary, JobError>;

    async fn run_learning_cycle(&self) -> Result<LearningSummary, JobError>;

    /// Governance score in `[0, 100]`.
    async fn compute_governance_score(&self) -> Result<f64, JobError>;

    async fn self_heal(&self) -> Result<SelfHealSummary, JobError>;
}

/// Parameterized statement executor for audit rows.
#[async_trait]
pub trait BreadcrumbStore: Send + Sync {
    /// Run `sql` with positional `params`. Returns the affected row count.
    async fn execute(&self, sql: &str, params: &[serde_json::Value]) -> Result<u64, JobError>;
}

/// Write one audit row for `job_name`.
///
/// Breadcrumbs are best effort: a failed write is logged and does not
/// fail the job.
pub async fn record_breadcrumb(
    store: &dyn BreadcrumbStore,
    job_name: &str,
    action: &str,
    details: serde_json::Value,
) {
    let params = [
        serde_json::Value::from(job_name),
        serde_json::Value::from(action),
        serde_json::Value::from(details.to_string()),
        serde_json::Value::from(Utc::now().to_rfc3339()),
    ];
    if let Err(e) = store.execute(BREADCRUMB_INSERT_SQL, &params).await {
        warn!(job = %job_name, action, error = %e, "Failed to write breadcrumb");
    }
}

/// Configuration of every built-in job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuiltinJobsConfig {
    pub ai_forecast: ForecastJobConfig,
    pub ai_learning: LearningJobConfig,
    pub governance_score: GovernanceJobConfig,
    pub self_heal: SelfHealJobConfig,
}

/// Register every enabled built-in job. Returns the registered names.
pub fn register_builtin_jobs(
    scheduler: &SchedulerService,
    backend: Arc<dyn AiOpsBackend>,
    store: Arc<dyn BreadcrumbStore>,
    config: &BuiltinJobsConfig,
) -> Result<Vec<String>, SchedulerError> {
    let mut registered = Vec::new();

    if config.ai_forecast.enabled {
        create_forecast_job(scheduler, backend.clone(), store.clone(), config.ai_forecast.clone())?;
        registered.push(FORECAST_JOB.to_string());
    }
    if config.ai_learning.enabled {
        create_learning_job(scheduler, backend.clone(), store.clone(), config.ai_learning.clone())?;
        registered.push(LEARNING_JOB.to_string());
    }
    if config.governance_score.enabled {
        create_governance_job(
            scheduler,
            backend.clone(),
            store.clone(),
            config.governance_score.clone(),
        )?;
        registered.push(GOVERNANCE_JOB.to_string());
    }
    if config.self_heal.enabled {
        create_self_heal_job(scheduler, backend, store, config.self_heal.clone())?;
        registered.push(SELF_HEAL_JOB.to_string());
    }

    info!(jobs = ?registered, "Registered built-in jobs");
    Ok(registered)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory collaborators for job tests.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Backend whose first `fail_times` calls of each operation fail.
    #[derive(Default)]
    pub struct FakeBackend {
        pub fail_times: u32,
        pub calls: AtomicU32,
        pub score: f64,
    }

    impl FakeBackend {
        pub fn failing(fail_times: u32) -> Self {
            Self {
                fail_times,
                score: 87.5,
                ..Default::default()
            }
        }

        fn next(&self) -> Result<(), JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(JobError::Backend("application unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl AiOpsBackend for FakeBackend {
        async fn generate_forecasts(&self) -> Result<ForecastSummary, JobError> {
            self.next()?;
            Ok(ForecastSummary {
                forecasts_generated: 12,
                tenants_processed: 3,
            })
        }

        async fn run_learning_cycle(&self) -> Result<LearningSummary, JobError> {
            self.next()?;
            Ok(LearningSummary {
                models_updated: 2,
                samples_processed: 400,
            })
        }

        async fn compute_governance_score(&self) -> Result<f64, JobError> {
            self.next()?;
            Ok(self.score)
        }

        async fn self_heal(&self) -> Result<SelfHealSummary, JobError> {
            self.next()?;
            Ok(SelfHealSummary {
                issues_found: 1,
                issues_fixed: 1,
            })
        }
    }

    /// Store that keeps executed statements in memory.
    #[derive(Default)]
    pub struct MemoryStore {
        pub rows: Mutex<Vec<Vec<serde_json::Value>>>,
    }

    impl MemoryStore {
        pub fn actions(&self) -> Vec<(String, String)> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .map(|row| {
                    (
                        row[0].as_str().unwrap_or_default().to_string(),
                        row[1].as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        }
    }

    #[async_trait]
    impl BreadcrumbStore for MemoryStore {
        async fn execute(&self, sql: &str, params: &[serde_json::Value]) -> Result<u64, JobError> {
            assert_eq!(sql, BREADCRUMB_INSERT_SQL);
            self.rows.lock().unwrap().push(params.to_vec());
            Ok(1)
        }
    }
}
