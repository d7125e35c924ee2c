//! Start jitter for scheduled ticks.
//!
//! Jobs sharing a cron expression would otherwise hit the database at the
//! same instant. Jitter delays a scheduled tick by a random amount before
//! admission. Manual triggers never wait.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Maximum random delay before a scheduled tick is admitted.
///
/// # Example
///
/// ```
/// use watchdog_scheduler::JitterConfig;
///
/// let config = JitterConfig::new(30);
/// let delay = config.generate_jitter();
/// assert!(delay < std::time::Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JitterConfig {
    /// Maximum jitter in seconds (0 = no jitter).
    #[serde(default)]
    pub max_jitter_secs: u64,
}

impl JitterConfig {
    pub fn new(max_jitter_secs: u64) -> Self {
        Self { max_jitter_secs }
    }

    pub fn none() -> Self {
        Self { max_jitter_secs: 0 }
    }

    /// Random duration in `[0, max_jitter_secs)`, zero when disabled.
    pub fn generate_jitter(&self) -> Duration {
        if self.max_jitter_secs == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(jitter_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_jitter_secs > 0
    }
}

/// Sleep for a random jitter unless `shutdown` fires first.
///
/// Returns `false` if shutdown interrupted the wait.
pub async fn wait_jitter(config: JitterConfig, shutdown: &CancellationToken) -> bool {
    let jitter = config.generate_jitter();
    if jitter.is_zero() {
        return !shutdown.is_cancelled();
    }
    tracing::debug!(jitter_ms = jitter.as_millis() as u64, "Applying jitter delay");
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(jitter) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_zero_is_immediate() {
        let config = JitterConfig::new(0);
        assert_eq!(config.generate_jitter(), Duration::ZERO);
        assert!(!config.is_enabled());
        assert_eq!(config, JitterConfig::default());
    }

    #[test]
    fn test_jitter_within_bounds() {
        let config = JitterConfig::new(10);
        assert!(config.is_enabled());

        let samples: Vec<Duration> = (0..500).map(|_| config.generate_jitter()).collect();
        assert!(samples.iter().all(|s| *s < Duration::from_secs(10)));

        let unique: std::collections::HashSet<_> = samples.iter().map(|d| d.as_millis()).collect();
        assert!(unique.len() > 1, "Jitter should produce varied values");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_jitter_completes() {
        let token = CancellationToken::new();
        assert!(wait_jitter(JitterConfig::new(2), &token).await);
        assert!(wait_jitter(JitterConfig::none(), &token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_jitter_interrupted_by_shutdown() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(!wait_jitter(JitterConfig::new(60), &token).await);
        assert!(!wait_jitter(JitterConfig::none(), &token).await);
    }
}
