//! Integration tests for the watchdog daemon.
//!
//! These tests wire the real pieces together: the ops API on a TCP port,
//! the built-in jobs, the HTTP backend against a stub application and the
//! SQLite breadcrumb store.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::time::sleep;

use watchdog_daemon::{run_ops_server_with_shutdown, HttpOpsBackend, SqliteBreadcrumbStore};
use watchdog_scheduler::jobs::{register_builtin_jobs, BuiltinJobsConfig};
use watchdog_scheduler::{JobPolicy, SchedulerConfig, SchedulerService, Sinks};

/// Stub of the main application's internal AI-ops endpoints.
async fn spawn_stub_app(governance_failures: Arc<AtomicU32>) -> String {
    let app = Router::new()
        .route(
            "/internal/ai-ops/forecasts",
            post(|| async { Json(json!({"forecasts_generated": 7, "tenants_processed": 2})) }),
        )
        .route(
            "/internal/ai-ops/learning-cycle",
            post(|| async { Json(json!({"models_updated": 1, "samples_processed": 500})) }),
        )
        .route(
            "/internal/ai-ops/governance-score",
            post(move || {
                let failures = governance_failures.clone();
                async move {
                    let remaining = failures.load(Ordering::SeqCst);
                    if remaining > 0 {
                        failures.store(remaining - 1, Ordering::SeqCst);
                        return Err(axum::http::StatusCode::SERVICE_UNAVAILABLE);
                    }
                    Ok(Json(json!({"score": 93.0})))
                }
            }),
        )
        .route(
            "/internal/ai-ops/self-heal",
            post(|| async { Json(json!({"issues_found": 1, "issues_fixed": 1})) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

const YEARLY: &str = "0 0 0 1 1 *";

fn fast_jobs() -> BuiltinJobsConfig {
    let mut jobs = BuiltinJobsConfig::default();
    let policy = JobPolicy::new(Duration::from_secs(5), 2, Duration::from_millis(20), 2.0);
    jobs.ai_forecast.policy = policy.clone();
    jobs.ai_learning.policy = policy.clone();
    jobs.governance_score.policy = policy;
    // Once a year, so no tick lands inside a test.
    jobs.ai_forecast.cron = YEARLY.to_string();
    jobs.ai_learning.cron = YEARLY.to_string();
    jobs.governance_score.cron = YEARLY.to_string();
    jobs.self_heal.cron = YEARLY.to_string();
    jobs
}

/// Test harness that manages daemon lifecycle.
struct TestHarness {
    _temp_dir: TempDir,
    scheduler: SchedulerService,
    store: Arc<SqliteBreadcrumbStore>,
    endpoint: String,
    client: reqwest::Client,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestHarness {
    async fn new(governance_failures: u32) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_url = format!(
            "sqlite://{}",
            temp_dir.path().join("breadcrumbs.db").to_string_lossy()
        );
        let store = Arc::new(SqliteBreadcrumbStore::connect(&db_url).await.unwrap());

        let app_url = spawn_stub_app(Arc::new(AtomicU32::new(governance_failures))).await;
        let backend = HttpOpsBackend::new(&app_url, None, Duration::from_secs(5)).unwrap();

        let scheduler = SchedulerService::new(SchedulerConfig::default(), Sinks::default())
            .await
            .unwrap();
        register_builtin_jobs(&scheduler, Arc::new(backend), store.clone(), &fast_jobs()).unwrap();
        scheduler.start().await.unwrap();

        // Reserve a free port for the ops API.
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr: SocketAddr = probe.local_addr().unwrap();
        drop(probe);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(run_ops_server_with_shutdown(addr, scheduler.clone(), async move {
            shutdown_rx.await.ok();
        }));

        let endpoint = format!("http://{}", addr);
        let client = reqwest::Client::new();
        for _ in 0..20 {
            if client.get(format!("{}/health", endpoint)).send().await.is_ok() {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }

        Self {
            _temp_dir: temp_dir,
            scheduler,
            store,
            endpoint,
            client,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    async fn post(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .send()
            .await
            .unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.endpoint, path))
            .send()
            .await
            .unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    async fn breadcrumb_actions(&self) -> Vec<(String, String)> {
        sqlx::query_as("SELECT job_name, action FROM ai_ops_breadcrumbs ORDER BY id")
            .fetch_all(self.store.pool())
            .await
            .unwrap()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_builtin_jobs_writes_breadcrumbs() {
    let harness = TestHarness::new(0).await;

    for job in ["ai_forecast", "ai_learning", "self_heal"] {
        let (status, body) = harness
            .post(&format!("/watchdog/jobs/{}/trigger", job))
            .await;
        assert_eq!(status, 200, "{} -> {}", job, body);
        assert_eq!(body["success"], true);
    }

    assert_eq!(
        harness.breadcrumb_actions().await,
        vec![
            ("ai_forecast".to_string(), "forecasts_generated".to_string()),
            ("ai_learning".to_string(), "learning_cycle".to_string()),
            ("self_heal".to_string(), "self_heal".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_governance_retries_then_succeeds() {
    let harness = TestHarness::new(1).await;

    let (status, body) = harness
        .post("/watchdog/jobs/governance_score/trigger")
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["attempts"], 2);
    assert_eq!(body["retries_used"], 1);

    let (status, body) = harness.get("/watchdog/status").await;
    assert_eq!(status, 200);
    let metrics = &body["job_metrics"]["governance_score"];
    assert_eq!(metrics["run_count"], 1);
    assert_eq!(metrics["error_count"], 0);
    assert_eq!(metrics["retry_count"], 1);
    assert_eq!(metrics["last_attempts"], 2);
    assert_eq!(body["is_running"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_breaker_opens_over_http() {
    // Every attempt of three runs fails.
    let harness = TestHarness::new(9).await;

    for _ in 0..3 {
        let (status, body) = harness
            .post("/watchdog/jobs/governance_score/trigger")
            .await;
        assert_eq!(status, 500);
        assert_eq!(body["exhausted_retries"], true);
    }

    let (status, body) = harness
        .post("/watchdog/jobs/governance_score/trigger")
        .await;
    assert_eq!(status, 503);
    assert_eq!(body["reason"], "circuit_breaker");

    let (_, health) = harness.get("/health").await;
    assert_eq!(health["open_circuit_breakers"], 1);
    assert_eq!(health["status"], "healthy");

    let (_, reset) = harness
        .post("/watchdog/circuit-breakers/governance_score/reset")
        .await;
    assert_eq!(reset["success"], true);
    assert_eq!(reset["job"], "governance_score");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_reflected_in_ready() {
    let harness = TestHarness::new(0).await;

    let (status, _) = harness.get("/ready").await;
    assert_eq!(status, 200);

    let report = harness
        .scheduler
        .graceful_shutdown(Some(Duration::from_secs(1)))
        .await;
    assert!(report.drained);

    let (status, body) = harness.get("/ready").await;
    assert_eq!(status, 503);
    assert_eq!(body["ready"], false);

    let (status, body) = harness.post("/watchdog/jobs/self_heal/trigger").await;
    assert_eq!(status, 503);
    assert_eq!(body["reason"], "shutdown");
}
