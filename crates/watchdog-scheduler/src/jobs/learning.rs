//! Learning cycle job.
//!
//! Folds recent forecast outcomes back into the application's models.
//! Runs after the forecast job so the next forecast sees the update.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{record_breadcrumb, AiOpsBackend, BreadcrumbStore};
use crate::{JitterConfig, JobDefinition, JobPolicy, SchedulerError, SchedulerService};

pub const LEARNING_JOB: &str = "ai_learning";

/// Configuration for the learning job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningJobConfig {
    pub enabled: bool,

    /// Cron expression (default: "0 30 3 * * *" = 3:30 AM daily)
    pub cron: String,

    /// Timezone (default: "UTC")
    pub timezone: String,

    /// Max jitter in seconds (default: 120)
    pub jitter_secs: u64,

    /// Execution policy (default: 30 min timeout, 1 retry after 60s)
    pub policy: JobPolicy,
}

impl Default for LearningJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 30 3 * * *".to_string(),
            timezone: "UTC".to_string(),
            jitter_secs: 120,
            policy: JobPolicy::new(
                Duration::from_secs(1800),
                1,
                Duration::from_secs(60),
                2.0,
            ),
        }
    }
}

/// Register the learning job with the scheduler.
pub fn create_learning_job(
    scheduler: &SchedulerService,
    backend: Arc<dyn AiOpsBackend>,
    store: Arc<dyn BreadcrumbStore>,
    config: LearningJobConfig,
) -> Result<(), SchedulerError> {
    let job = JobDefinition::new(LEARNING_JOB, move |ctx| {
        let backend = backend.clone();
        let store = store.clone();
        async move {
            info!(job = LEARNING_JOB, attempt = ctx.attempt, "Starting learning cycle");
            let summary = backend.run_learning_cycle().await?;
            if ctx.is_cancelled() {
                // Attempt already timed out; the executor has moved on.
                return Ok(());
            }
            info!(
                job = LEARNING_JOB,
                models = summary.models_updated,
                samples = summary.samples_processed,
                "Learning cycle complete"
            );
            let details = serde_json::to_value(&summary).unwrap_or_default();
            record_breadcrumb(store.as_ref(), LEARNING_JOB, "learning_cycle", details).await;
            Ok(())
        }
    })
    .with_schedule(config.cron)
    .with_timezone(config.timezone)
    .with_jitter(JitterConfig::new(config.jitter_secs))
    .with_policy(config.policy);

    scheduler.register(job)?;
    info!("Registered learning job");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{FakeBackend, MemoryStore};
    use crate::{SchedulerConfig, Sinks};

    #[test]
    fn test_learning_config_serialization() {
        let config = LearningJobConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: LearningJobConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, decoded);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_learning_job_retries_then_succeeds() {
        let scheduler = SchedulerService::new(SchedulerConfig::default(), Sinks::default())
            .await
            .unwrap();
        let store = Arc::new(MemoryStore::default());
        let config = LearningJobConfig {
            policy: JobPolicy::new(Duration::from_secs(1), 1, Duration::from_millis(10), 2.0),
            ..Default::default()
        };
        create_learning_job(&scheduler, Arc::new(FakeBackend::failing(1)), store.clone(), config)
            .unwrap();

        let outcome = scheduler.trigger_job(LEARNING_JOB).await.unwrap();
        let run = outcome.run().unwrap();
        assert!(run.success);
        assert_eq!(run.attempts, 2);
        assert_eq!(store.actions().len(), 1);
    }
}
