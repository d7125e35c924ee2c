//! Graceful shutdown: stop admission, then drain running jobs.
//!
//! Shutdown is terminal. Once started, every admission is skipped with
//! reason `shutdown`, cron triggers are removed and retry backoffs are
//! cut short. Running attempts are left to finish until the deadline;
//! anything still active then is abandoned, never killed.

use std::sync::atomic::Ordering;
use std::sync::PoisonError;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::scheduler::SchedulerService;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a graceful shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Every running job finished before the deadline.
    pub drained: bool,
    /// Jobs still running at the deadline, sorted.
    pub abandoned: Vec<String>,
    pub waited_ms: u64,
}

impl SchedulerService {
    /// Stop admitting work and wait for running jobs to finish.
    ///
    /// Waits at most `max_wait`, or `shutdown_timeout_secs` from the
    /// configuration when `None`. Calling again, concurrently or later,
    /// returns the report of the first call without restarting the drain.
    pub async fn graceful_shutdown(&self, max_wait: Option<Duration>) -> ShutdownReport {
        let max_wait = max_wait.unwrap_or_else(|| self.inner.config.shutdown_timeout());

        let first = {
            let mut done = self
                .inner
                .shutdown_done
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match done.as_ref() {
                Some(rx) => Err(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *done = Some(rx);
                    Ok(tx)
                }
            }
        };

        match first {
            Ok(tx) => {
                let report = self.drain(max_wait).await;
                tx.send_replace(Some(report.clone()));
                report
            }
            Err(mut rx) => {
                info!("Shutdown already in progress, waiting for it to complete");
                let finished = rx.wait_for(Option::is_some).await.ok().and_then(|r| r.clone());
                finished.unwrap_or_else(|| self.current_report(0))
            }
        }
    }

    async fn drain(&self, max_wait: Duration) -> ShutdownReport {
        let start = Instant::now();
        info!(
            max_wait_ms = max_wait.as_millis() as u64,
            active_jobs = self.inner.active.len(),
            "Graceful shutdown started"
        );

        self.inner.is_shutting_down.store(true, Ordering::SeqCst);
        self.inner.shutdown_token.cancel();

        if self.inner.is_running.swap(false, Ordering::SeqCst) {
            self.deactivate_triggers().await;
        }
        if self.inner.cron_started.swap(false, Ordering::SeqCst) {
            let mut scheduler = self.inner.scheduler.clone();
            if let Err(e) = scheduler.shutdown().await {
                warn!(error = %e, "Error during cron scheduler shutdown");
            }
        }

        let deadline = start + max_wait;
        let mut last_log = start;
        loop {
            let remaining = self.inner.active.names();
            let now = Instant::now();
            let waited_ms = now.duration_since(start).as_millis() as u64;

            if remaining.is_empty() {
                info!(waited_ms, "Graceful shutdown complete, all jobs drained");
                return self.current_report(waited_ms);
            }
            if now >= deadline {
                warn!(
                    waited_ms,
                    abandoned = ?remaining,
                    "Shutdown deadline reached, abandoning running jobs"
                );
                return ShutdownReport {
                    drained: false,
                    abandoned: remaining,
                    waited_ms,
                };
            }
            if now.duration_since(last_log) >= LOG_INTERVAL {
                info!(remaining = ?remaining, "Waiting for running jobs to finish");
                last_log = now;
            }

            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    fn current_report(&self, waited_ms: u64) -> ShutdownReport {
        let abandoned = self.inner.active.names();
        ShutdownReport {
            drained: abandoned.is_empty(),
            abandoned,
            waited_ms,
        }
    }
}
