//! Governance score job.
//!
//! Recomputes the AI governance score and announces it on the real-time
//! bus so dashboards refresh without polling.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{record_breadcrumb, AiOpsBackend, BreadcrumbStore};
use crate::{
    JitterConfig, JobDefinition, JobError, JobPolicy, SchedulerError, SchedulerService,
    WatchdogEvent,
};

pub const GOVERNANCE_JOB: &str = "governance_score";

/// Bus topic carrying the new score.
pub const GOVERNANCE_SCORE_TOPIC: &str = "governance.score_updated";

/// Configuration for the governance job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceJobConfig {
    pub enabled: bool,

    /// Cron expression (default: "0 0 * * * *" = hourly)
    pub cron: String,

    /// Timezone (default: "UTC")
    pub timezone: String,

    /// Max jitter in seconds (default: 30)
    pub jitter_secs: u64,

    /// Execution policy (default: 2 min timeout, 2 retries from 10s)
    pub policy: JobPolicy,
}

impl Default for GovernanceJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 0 * * * *".to_string(),
            timezone: "UTC".to_string(),
            jitter_secs: 30,
            policy: JobPolicy::new(
                Duration::from_secs(120),
                2,
                Duration::from_secs(10),
                2.0,
            ),
        }
    }
}

/// Register the governance job with the scheduler.
pub fn create_governance_job(
    scheduler: &SchedulerService,
    backend: Arc<dyn AiOpsBackend>,
    store: Arc<dyn BreadcrumbStore>,
    config: GovernanceJobConfig,
) -> Result<(), SchedulerError> {
    let job = JobDefinition::new(GOVERNANCE_JOB, move |ctx| {
        let backend = backend.clone();
        let store = store.clone();
        async move {
            let score = backend.compute_governance_score().await?;
            if !score.is_finite() || !(0.0..=100.0).contains(&score) {
                return Err(JobError::failed(format!("governance score out of range: {}", score)));
            }

            info!(job = GOVERNANCE_JOB, score, "Governance score updated");
            ctx.publish(WatchdogEvent::notice(
                GOVERNANCE_SCORE_TOPIC,
                json!({ "score": score, "run_id": ctx.run_id }),
            ));
            record_breadcrumb(
                store.as_ref(),
                GOVERNANCE_JOB,
                "score_updated",
                json!({ "score": score }),
            )
            .await;
            Ok(())
        }
    })
    .with_schedule(config.cron)
    .with_timezone(config.timezone)
    .with_jitter(JitterConfig::new(config.jitter_secs))
    .with_policy(config.policy);

    scheduler.register(job)?;
    info!("Registered governance job");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{FakeBackend, MemoryStore};
    use crate::{BroadcastPublisher, NoopMetrics, SchedulerConfig, Sinks};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_governance_publishes_score() {
        let publisher = Arc::new(BroadcastPublisher::new(16));
        let mut events = publisher.subscribe();
        let scheduler = SchedulerService::new(
            SchedulerConfig::default(),
            Sinks::new(Arc::new(NoopMetrics), publisher.clone()),
        )
        .await
        .unwrap();
        let store = Arc::new(MemoryStore::default());
        create_governance_job(
            &scheduler,
            Arc::new(FakeBackend::failing(0)),
            store.clone(),
            GovernanceJobConfig::default(),
        )
        .unwrap();

        assert!(scheduler.trigger_job(GOVERNANCE_JOB).await.unwrap().is_success());

        let mut score = None;
        while let Ok(event) = events.try_recv() {
            if let WatchdogEvent::Notice { topic, payload, .. } = event {
                assert_eq!(topic, GOVERNANCE_SCORE_TOPIC);
                score = payload["score"].as_f64();
            }
        }
        assert_eq!(score, Some(87.5));
        assert_eq!(store.actions()[0].1, "score_updated");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_governance_rejects_out_of_range_score() {
        let scheduler = SchedulerService::new(SchedulerConfig::default(), Sinks::default())
            .await
            .unwrap();
        let backend = FakeBackend {
            score: 140.0,
            ..Default::default()
        };
        let config = GovernanceJobConfig {
            policy: JobPolicy::no_retry(Duration::from_secs(1)),
            ..Default::default()
        };
        create_governance_job(
            &scheduler,
            Arc::new(backend),
            Arc::new(MemoryStore::default()),
            config,
        )
        .unwrap();

        let outcome = scheduler.trigger_job(GOVERNANCE_JOB).await.unwrap();
        assert!(!outcome.is_success());
        assert!(outcome
            .run()
            .and_then(|r| r.error.as_deref())
            .unwrap()
            .contains("out of range"));
    }
}
