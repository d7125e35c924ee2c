//! Active job set: at most one execution per job name.
//!
//! A name stays in the set from admission until its run cycle ends,
//! retry backoff sleeps included. Overlapping admissions are skipped,
//! never queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::sink::MetricsSink;

struct Inner {
    names: Mutex<HashSet<String>>,
    metrics: Arc<dyn MetricsSink>,
}

/// Names of the jobs currently executing.
#[derive(Clone)]
pub struct ActiveJobs {
    inner: Arc<Inner>,
}

impl ActiveJobs {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                names: Mutex::new(HashSet::new()),
                metrics,
            }),
        }
    }

    /// Mark `job_name` as running.
    ///
    /// Returns `None` when it already is. The returned guard removes the
    /// name when dropped, including when the run panics.
    pub fn try_acquire(&self, job_name: &str) -> Option<RunGuard> {
        let count = {
            let mut names = self.inner.names.lock().unwrap_or_else(PoisonError::into_inner);
            if !names.insert(job_name.to_string()) {
                return None;
            }
            names.len()
        };
        self.inner.metrics.set_active_jobs(count);
        Some(RunGuard {
            inner: self.inner.clone(),
            job_name: job_name.to_string(),
        })
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.inner
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_name)
    }

    /// Running job names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .inner
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RAII membership in the active set.
pub struct RunGuard {
    inner: Arc<Inner>,
    job_name: String,
}

impl RunGuard {
    pub fn job_name(&self) -> &str {
        &self.job_name
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let count = {
            let mut names = self.inner.names.lock().unwrap_or_else(PoisonError::into_inner);
            names.remove(&self.job_name);
            names.len()
        };
        self.inner.metrics.set_active_jobs(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    use crate::sink::NoopMetrics;

    fn active() -> ActiveJobs {
        ActiveJobs::new(Arc::new(NoopMetrics))
    }

    #[test]
    fn test_second_acquire_is_refused() {
        let jobs = active();

        let run1 = jobs.try_acquire("ai_forecast");
        assert!(run1.is_some());
        assert!(jobs.is_running("ai_forecast"));
        assert!(jobs.try_acquire("ai_forecast").is_none());

        drop(run1);
        assert!(!jobs.is_running("ai_forecast"));
        assert!(jobs.try_acquire("ai_forecast").is_some());
    }

    #[test]
    fn test_different_jobs_run_together() {
        let jobs = active();
        let _a = jobs.try_acquire("ai_forecast").unwrap();
        let _b = jobs.try_acquire("self_heal").unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs.names(), vec!["ai_forecast", "self_heal"]);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let jobs = active();
        {
            let guard = jobs.try_acquire("governance_score").unwrap();
            assert_eq!(guard.job_name(), "governance_score");
            assert!(!jobs.is_empty());
        }
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_concurrent_acquire_admits_one() {
        let jobs = active();
        let admitted = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let jobs = jobs.clone();
                let admitted = admitted.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    if let Some(_guard) = jobs.try_acquire("ai_forecast") {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(200));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert!(jobs.is_empty());
    }
}
