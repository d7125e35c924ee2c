//! Per-job circuit breaker.
//!
//! States:
//! - Closed: normal operation. Represented by the absence of an entry.
//! - Open: the job failed too often; runs are denied until `next_retry_at`.
//! - HalfOpen: the cooldown elapsed; a limited number of probe runs decide
//!   whether the job closes again or reopens.
//!
//! Only recorded run results move the breaker. Skipped runs never do.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;

/// Breaker state for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored breaker record. Jobs without a record are closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerEntry {
    pub state: BreakerState,
    /// Consecutive recorded failures.
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Earliest time a probe is allowed. Only meaningful while open.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Probes admitted since entering half-open.
    pub half_open_attempts: u32,
}

impl BreakerEntry {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_at: None,
            next_retry_at: None,
            half_open_attempts: 0,
        }
    }
}

/// Answer to "may this job run now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerDecision {
    pub allowed: bool,
    pub state: BreakerState,
    /// Remaining cooldown when denied because the breaker is open.
    pub retry_in: Option<Duration>,
}

impl BreakerDecision {
    fn allow(state: BreakerState) -> Self {
        Self {
            allowed: true,
            state,
            retry_in: None,
        }
    }

    fn deny(state: BreakerState, retry_in: Option<Duration>) -> Self {
        Self {
            allowed: false,
            state,
            retry_in,
        }
    }
}

/// Circuit breakers for every job of one scheduler.
pub struct CircuitBreakers {
    config: BreakerConfig,
    entries: RwLock<HashMap<String, BreakerEntry>>,
}

impl CircuitBreakers {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Check whether `job_name` may run now.
    pub fn may_run(&self, job_name: &str) -> BreakerDecision {
        self.may_run_at(job_name, Utc::now())
    }

    /// Check whether `job_name` may run at `now`.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and
    /// the call that observes it is admitted as the first probe.
    pub fn may_run_at(&self, job_name: &str, now: DateTime<Utc>) -> BreakerDecision {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(job_name) else {
            return BreakerDecision::allow(BreakerState::Closed);
        };

        match entry.state {
            BreakerState::Closed => BreakerDecision::allow(BreakerState::Closed),
            BreakerState::Open => {
                let next = entry.next_retry_at.unwrap_or(now);
                if now >= next {
                    entry.state = BreakerState::HalfOpen;
                    entry.half_open_attempts = 1;
                    info!(job = %job_name, "Circuit breaker half-open, admitting probe");
                    BreakerDecision::allow(BreakerState::HalfOpen)
                } else {
                    let retry_in = (next - now).to_std().ok();
                    debug!(
                        job = %job_name,
                        retry_in_ms = retry_in.map(|d| d.as_millis() as u64).unwrap_or(0),
                        "Circuit breaker open"
                    );
                    BreakerDecision::deny(BreakerState::Open, retry_in)
                }
            }
            BreakerState::HalfOpen => {
                if entry.half_open_attempts < self.config.half_open_max_attempts {
                    entry.half_open_attempts += 1;
                    BreakerDecision::allow(BreakerState::HalfOpen)
                } else {
                    BreakerDecision::deny(BreakerState::HalfOpen, None)
                }
            }
        }
    }

    /// Feed the outcome of a full run cycle into the breaker.
    ///
    /// Returns the state after the update and the failure count.
    pub fn record_result(&self, job_name: &str, success: bool) -> (BreakerState, u32) {
        self.record_result_at(job_name, success, Utc::now())
    }

    pub fn record_result_at(
        &self,
        job_name: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> (BreakerState, u32) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if success {
            if let Some(previous) = entries.remove(job_name) {
                if previous.state == BreakerState::HalfOpen {
                    info!(job = %job_name, "Circuit breaker closed after successful probe");
                }
            }
            return (BreakerState::Closed, 0);
        }

        let reopen_at = now
            .checked_add_signed(
                chrono::Duration::from_std(self.config.reset_timeout())
                    .unwrap_or(chrono::Duration::MAX),
            )
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let entry = entries
            .entry(job_name.to_string())
            .or_insert_with(BreakerEntry::closed);
        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure_at = Some(now);

        if entry.state == BreakerState::HalfOpen {
            entry.state = BreakerState::Open;
            entry.next_retry_at = Some(reopen_at);
            entry.half_open_attempts = 0;
            warn!(
                job = %job_name,
                failures = entry.failure_count,
                next_retry_at = %reopen_at,
                "Circuit breaker reopened after failed probe"
            );
        } else if entry.failure_count >= self.config.failure_threshold {
            entry.state = BreakerState::Open;
            entry.next_retry_at = Some(reopen_at);
            warn!(
                job = %job_name,
                failures = entry.failure_count,
                next_retry_at = %reopen_at,
                "Circuit breaker opened"
            );
        }

        (entry.state, entry.failure_count)
    }

    /// Manually clear a breaker. Returns `false` when there was nothing to
    /// clear.
    pub fn reset(&self, job_name: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_name)
            .is_some();
        if removed {
            info!(job = %job_name, "Circuit breaker manually reset");
        }
        removed
    }

    /// Current record for one job, `None` meaning closed.
    pub fn get(&self, job_name: &str) -> Option<BreakerEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .cloned()
    }

    pub fn state(&self, job_name: &str) -> BreakerState {
        self.get(job_name)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Snapshot of every stored breaker.
    pub fn status(&self) -> HashMap<String, BreakerEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of breakers currently open.
    pub fn open_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.state == BreakerState::Open)
            .count()
    }
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn trip(breakers: &CircuitBreakers, job: &str, now: DateTime<Utc>) {
        for _ in 0..breakers.config().failure_threshold {
            breakers.record_result_at(job, false, now);
        }
    }

    #[test]
    fn test_unknown_job_is_closed() {
        let breakers = CircuitBreakers::default();
        let decision = breakers.may_run_at("ai_forecast", t0());
        assert!(decision.allowed);
        assert_eq!(decision.state, BreakerState::Closed);
        assert!(breakers.get("ai_forecast").is_none());
    }

    #[test]
    fn test_failures_below_threshold_stay_closed() {
        let breakers = CircuitBreakers::default();
        breakers.record_result_at("ai_forecast", false, t0());
        let (state, failures) = breakers.record_result_at("ai_forecast", false, t0());

        assert_eq!(state, BreakerState::Closed);
        assert_eq!(failures, 2);
        assert!(breakers.may_run_at("ai_forecast", t0()).allowed);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breakers = CircuitBreakers::default();
        breakers.record_result_at("ai_forecast", false, t0());
        breakers.record_result_at("ai_forecast", false, t0());
        breakers.record_result_at("ai_forecast", true, t0());
        assert!(breakers.get("ai_forecast").is_none());

        // Two more failures must not open it; the count started over.
        breakers.record_result_at("ai_forecast", false, t0());
        let (state, failures) = breakers.record_result_at("ai_forecast", false, t0());
        assert_eq!(state, BreakerState::Closed);
        assert_eq!(failures, 2);
    }

    #[test]
    fn test_threshold_opens_and_denies() {
        let breakers = CircuitBreakers::default();
        trip(&breakers, "ai_forecast", t0());

        let entry = breakers.get("ai_forecast").unwrap();
        assert_eq!(entry.state, BreakerState::Open);
        assert_eq!(entry.failure_count, 3);
        assert_eq!(entry.last_failure_at, Some(t0()));
        assert_eq!(entry.next_retry_at, Some(t0() + secs(300)));

        let decision = breakers.may_run_at("ai_forecast", t0() + secs(60));
        assert!(!decision.allowed);
        assert_eq!(decision.state, BreakerState::Open);
        assert_eq!(decision.retry_in, Some(Duration::from_secs(240)));
        assert_eq!(breakers.open_count(), 1);
    }

    #[test]
    fn test_half_open_allows_single_probe() {
        let breakers = CircuitBreakers::default();
        trip(&breakers, "ai_forecast", t0());

        let later = t0() + secs(300);
        let probe = breakers.may_run_at("ai_forecast", later);
        assert!(probe.allowed);
        assert_eq!(probe.state, BreakerState::HalfOpen);

        let second = breakers.may_run_at("ai_forecast", later);
        assert!(!second.allowed);
        assert_eq!(second.state, BreakerState::HalfOpen);
        assert_eq!(breakers.state("ai_forecast"), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_success_closes() {
        let breakers = CircuitBreakers::default();
        trip(&breakers, "ai_forecast", t0());
        assert!(breakers.may_run_at("ai_forecast", t0() + secs(301)).allowed);

        let (state, failures) = breakers.record_result_at("ai_forecast", true, t0() + secs(302));
        assert_eq!(state, BreakerState::Closed);
        assert_eq!(failures, 0);
        assert!(breakers.get("ai_forecast").is_none());
        assert!(breakers.status().is_empty());
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_deadline() {
        let breakers = CircuitBreakers::default();
        trip(&breakers, "ai_forecast", t0());

        let probe_at = t0() + secs(400);
        assert!(breakers.may_run_at("ai_forecast", probe_at).allowed);
        let (state, _) = breakers.record_result_at("ai_forecast", false, probe_at);
        assert_eq!(state, BreakerState::Open);

        let entry = breakers.get("ai_forecast").unwrap();
        assert_eq!(entry.next_retry_at, Some(probe_at + secs(300)));
        assert_eq!(entry.half_open_attempts, 0);
        assert!(!breakers.may_run_at("ai_forecast", probe_at + secs(10)).allowed);
    }

    #[test]
    fn test_more_half_open_probes_when_configured() {
        let breakers = CircuitBreakers::new(BreakerConfig {
            half_open_max_attempts: 2,
            ..Default::default()
        });
        trip(&breakers, "self_heal", t0());

        let later = t0() + secs(300);
        assert!(breakers.may_run_at("self_heal", later).allowed);
        assert!(breakers.may_run_at("self_heal", later).allowed);
        assert!(!breakers.may_run_at("self_heal", later).allowed);
    }

    #[test]
    fn test_reset() {
        let breakers = CircuitBreakers::default();
        assert!(!breakers.reset("ai_forecast"));

        trip(&breakers, "ai_forecast", t0());
        assert!(breakers.reset("ai_forecast"));
        assert!(breakers.may_run_at("ai_forecast", t0()).allowed);
        assert!(!breakers.reset("ai_forecast"));
    }

    #[test]
    fn test_breakers_are_independent() {
        let breakers = CircuitBreakers::default();
        trip(&breakers, "ai_forecast", t0());

        assert!(!breakers.may_run_at("ai_forecast", t0()).allowed);
        assert!(breakers.may_run_at("governance_score", t0()).allowed);
        assert_eq!(breakers.status().len(), 1);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&BreakerState::HalfOpen).unwrap(),
            "\"half_open\""
        );
        assert_eq!(BreakerState::Open.to_string(), "open");
    }
}
