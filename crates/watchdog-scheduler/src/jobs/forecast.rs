//! Forecast generation job.
//!
//! Asks the application to regenerate demand forecasts for every tenant.
//! By default runs daily at 2 AM, outside trading hours.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{record_breadcrumb, AiOpsBackend, BreadcrumbStore};
use crate::{JitterConfig, JobDefinition, JobPolicy, SchedulerError, SchedulerService};

pub const FORECAST_JOB: &str = "ai_forecast";

/// Configuration for the forecast job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastJobConfig {
    pub enabled: bool,

    /// Cron expression (default: "0 0 2 * * *" = 2 AM daily)
    pub cron: String,

    /// Timezone (default: "UTC")
    pub timezone: String,

    /// Max jitter in seconds (default: 60)
    pub jitter_secs: u64,

    /// Execution policy (default: 10 min timeout, 2 retries from 30s)
    pub policy: JobPolicy,
}

impl Default for ForecastJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 0 2 * * *".to_string(),
            timezone: "UTC".to_string(),
            jitter_secs: 60,
            policy: JobPolicy::new(
                Duration::from_secs(600),
                2,
                Duration::from_secs(30),
                2.0,
            ),
        }
    }
}

/// Register the forecast job with the scheduler.
///
/// # Errors
///
/// Returns error if job registration fails (invalid cron, invalid timezone).
pub fn create_forecast_job(
    scheduler: &SchedulerService,
    backend: Arc<dyn AiOpsBackend>,
    store: Arc<dyn BreadcrumbStore>,
    config: ForecastJobConfig,
) -> Result<(), SchedulerError> {
    let job = JobDefinition::new(FORECAST_JOB, move |ctx| {
        let backend = backend.clone();
        let store = store.clone();
        async move {
            info!(job = FORECAST_JOB, attempt = ctx.attempt, "Generating forecasts");
            let summary = backend.generate_forecasts().await?;
            info!(
                job = FORECAST_JOB,
                forecasts = summary.forecasts_generated,
                tenants = summary.tenants_processed,
                "Forecasts generated"
            );
            let details = serde_json::to_value(&summary).unwrap_or_default();
            record_breadcrumb(store.as_ref(), FORECAST_JOB, "forecasts_generated", details).await;
            Ok(())
        }
    })
    .with_schedule(config.cron)
    .with_timezone(config.timezone)
    .with_jitter(JitterConfig::new(config.jitter_secs))
    .with_policy(config.policy);

    scheduler.register(job)?;
    info!("Registered forecast job");
    Ok(())
}
