//! Self-heal job: repair stuck operational state in the application.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{record_breadcrumb, AiOpsBackend, BreadcrumbStore};
use crate::{JitterConfig, JobDefinition, JobPolicy, SchedulerError, SchedulerService};

pub const SELF_HEAL_JOB: &str = "self_heal";

/// Configuration for the self-heal job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfHealJobConfig {
    pub enabled: bool,

    /// Cron expression (default: "0 */15 * * * *" = every 15 minutes)
    pub cron: String,

    /// Timezone (default: "UTC")
    pub timezone: String,

    /// Max jitter in seconds (default: 0)
    pub jitter_secs: u64,

    /// Execution policy (default: 60s timeout, no retry)
    pub policy: JobPolicy,
}

impl Default for SelfHealJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 */15 * * * *".to_string(),
            timezone: "UTC".to_string(),
            jitter_secs: 0,
            policy: JobPolicy::no_retry(Duration::from_secs(60)),
        }
    }
}

/// Register the self-heal job with the scheduler.
pub fn create_self_heal_job(
    scheduler: &SchedulerService,
    backend: Arc<dyn AiOpsBackend>,
    store: Arc<dyn BreadcrumbStore>,
    config: SelfHealJobConfig,
) -> Result<(), SchedulerError> {
    let job = JobDefinition::new(SELF_HEAL_JOB, move |_ctx| {
        let backend = backend.clone();
        let store = store.clone();
        async move {
            let summary = backend.self_heal().await?;
            if summary.issues_fixed < summary.issues_found {
                warn!(
                    job = SELF_HEAL_JOB,
                    found = summary.issues_found,
                    fixed = summary.issues_fixed,
                    "Self-heal left issues unresolved"
                );
            } else {
                info!(job = SELF_HEAL_JOB, fixed = summary.issues_fixed, "Self-heal complete");
            }
            let details = serde_json::to_value(&summary).unwrap_or_default();
            record_breadcrumb(store.as_ref(), SELF_HEAL_JOB, "self_heal", details).await;
            Ok(())
        }
    })
    .with_schedule(config.cron)
    .with_timezone(config.timezone)
    .with_jitter(JitterConfig::new(config.jitter_secs))
    .with_policy(config.policy);

    scheduler.register(job)?;
    info!("Registered self-heal job");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{FakeBackend, MemoryStore};
    use crate::{validate_cron_expression, SchedulerConfig, Sinks};

    #[test]
    fn test_self_heal_config_default() {
        let config = SelfHealJobConfig::default();
        assert!(validate_cron_expression(&config.cron).is_ok());
        assert_eq!(config.policy.max_attempts(), 1);
        assert_eq!(config.jitter_secs, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_self_heal_job_runs() {
        let scheduler = SchedulerService::new(SchedulerConfig::default(), Sinks::default())
            .await
            .unwrap();
        let store = Arc::new(MemoryStore::default());
        create_self_heal_job(
            &scheduler,
            Arc::new(FakeBackend::default()),
            store.clone(),
            SelfHealJobConfig::default(),
        )
        .unwrap();

        assert!(scheduler.trigger_job(SELF_HEAL_JOB).await.unwrap().is_success());
        assert_eq!(
            store.actions(),
            vec![(SELF_HEAL_JOB.to_string(), "self_heal".to_string())]
        );
    }
}
