//! HTTP client for the main application's internal AI-ops endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use watchdog_scheduler::jobs::{AiOpsBackend, ForecastSummary, LearningSummary, SelfHealSummary};
use watchdog_scheduler::JobError;

use crate::error::DaemonError;

const FORECASTS_PATH: &str = "/internal/ai-ops/forecasts";
const LEARNING_PATH: &str = "/internal/ai-ops/learning-cycle";
const GOVERNANCE_PATH: &str = "/internal/ai-ops/governance-score";
const SELF_HEAL_PATH: &str = "/internal/ai-ops/self-heal";

#[derive(Debug, Deserialize)]
struct GovernanceScore {
    score: f64,
}

/// [`AiOpsBackend`] backed by `reqwest`.
///
/// Each call is a `POST` with an empty body; the application does the work
/// synchronously and answers with a JSON summary.
#[derive(Debug, Clone)]
pub struct HttpOpsBackend {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpOpsBackend {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, DaemonError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T, JobError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "Calling AI-ops endpoint");

        let mut request = self.client.post(&url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| JobError::Backend(format!("{}: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::Backend(describe_failure(path, status, &body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| JobError::Backend(format!("{}: invalid response: {}", path, e)))
    }
}

fn describe_failure(path: &str, status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("{} returned {}", path, status)
    } else {
        format!("{} returned {}: {}", path, status, body)
    }
}

#[async_trait]
impl AiOpsBackend for HttpOpsBackend {
    async fn generate_forecasts(&self) -> Result<ForecastSummary, JobError> {
        self.post(FORECASTS_PATH).await
    }

    async fn run_learning_cycle(&self) -> Result<LearningSummary, JobError> {
        self.post(LEARNING_PATH).await
    }

    async fn compute_governance_score(&self) -> Result<f64, JobError> {
        let body: GovernanceScore = self.post(GOVERNANCE_PATH).await?;
        Ok(body.score)
    }

    async fn self_heal(&self) -> Result<SelfHealSummary, JobError> {
        self.post(SELF_HEAL_PATH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn backend(base_url: &str, token: Option<&str>) -> HttpOpsBackend {
        HttpOpsBackend::new(base_url, token.map(String::from), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_summaries_are_decoded() {
        let app = Router::new()
            .route(
                FORECASTS_PATH,
                post(|| async { Json(json!({"forecasts_generated": 42, "tenants_processed": 3})) }),
            )
            .route(
                LEARNING_PATH,
                post(|| async { Json(json!({"models_updated": 2})) }),
            )
            .route(
                GOVERNANCE_PATH,
                post(|| async { Json(json!({"score": 91.5})) }),
            )
            .route(
                SELF_HEAL_PATH,
                post(|| async { Json(json!({"issues_found": 4, "issues_fixed": 4})) }),
            );
        let base = serve(app).await;
        let backend = backend(&format!("{}/", base), None);

        let forecast = backend.generate_forecasts().await.unwrap();
        assert_eq!(forecast.forecasts_generated, 42);
        assert_eq!(forecast.tenants_processed, 3);

        let learning = backend.run_learning_cycle().await.unwrap();
        assert_eq!(learning.models_updated, 2);
        assert_eq!(learning.samples_processed, 0);

        assert_eq!(backend.compute_governance_score().await.unwrap(), 91.5);
        assert_eq!(backend.self_heal().await.unwrap().issues_fixed, 4);
    }

    #[tokio::test]
    async fn test_bearer_token_sent() {
        let app = Router::new().route(
            GOVERNANCE_PATH,
            post(|headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let score = if auth == "Bearer s3cret" { 100.0 } else { 0.0 };
                Json(json!({ "score": score }))
            }),
        );
        let base = serve(app).await;

        let score = backend(&base, Some("s3cret"))
            .compute_governance_score()
            .await
            .unwrap();
        assert_eq!(score, 100.0);
    }

    #[tokio::test]
    async fn test_error_status_becomes_backend_error() {
        let app = Router::new().route(
            SELF_HEAL_PATH,
            post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let base = serve(app).await;

        match backend(&base, None).self_heal().await {
            Err(JobError::Backend(msg)) => {
                assert!(msg.contains("502"));
                assert!(msg.contains("upstream down"));
            }
            other => panic!("Expected backend error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = backend(&format!("http://{}", addr), None)
            .generate_forecasts()
            .await;
        assert!(matches!(result, Err(JobError::Backend(_))));
    }
}
