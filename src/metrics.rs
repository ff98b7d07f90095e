//! # Pool metrics: guarded counters and gauges.
//!
//! [`Metrics`] is the live, lock-guarded instance owned by the pool;
//! [`MetricsSnapshot`] is the plain copy handed to regulators and callers.
//! Mutations go through dedicated accessors under the write lock; readers
//! take the read lock and copy. There is no cross-counter atomicity beyond
//! the snapshot.
//!
//! Latency is tracked as a running average (`total_job_time / job_count`);
//! percentile estimation lives outside the pool core.

use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Point-in-time copy of the pool's counters and gauges.
#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    /// Workers currently registered in the pool.
    pub worker_count: usize,
    /// Jobs sitting in the queue, sampled periodically.
    pub queue_depth: usize,
    /// Workers currently processing a job.
    pub active_workers: usize,
    /// Total jobs that reached a terminal outcome.
    pub job_count: u64,
    /// Jobs whose terminal outcome was an error.
    pub failure_count: u64,
    /// Sum of job processing times.
    pub total_job_time: Duration,
    /// Running average of job processing time.
    pub average_latency: Duration,
    /// `(job_count - failure_count) / job_count`, `1.0` before any job.
    pub success_rate: f64,
    /// Externally supplied CPU utilization in `[0, 1]`.
    pub resource_utilization: f64,
    /// Submissions that failed to find a worker in time.
    pub scheduling_failures: u64,
    /// When the scaler last acted.
    pub last_scale: Option<Instant>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            worker_count: 0,
            queue_depth: 0,
            active_workers: 0,
            job_count: 0,
            failure_count: 0,
            total_job_time: Duration::ZERO,
            average_latency: Duration::ZERO,
            success_rate: 1.0,
            resource_utilization: 0.0,
            scheduling_failures: 0,
            last_scale: None,
        }
    }
}

impl MetricsSnapshot {
    /// Load ratio: jobs queued per registered worker (worker floor of 1).
    pub fn load_ratio(&self) -> f64 {
        self.queue_depth as f64 / self.worker_count.max(1) as f64
    }
}

/// Live metrics instance owned by one pool. Self-contained; there is no
/// process-global state.
#[derive(Default)]
pub struct Metrics {
    inner: RwLock<MetricsSnapshot>,
}

impl Metrics {
    /// Creates a zeroed metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current counters under the read lock.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.read().clone()
    }

    /// Records one terminal job outcome.
    pub fn record_completion(&self, elapsed: Duration, success: bool) {
        let mut m = self.write();
        m.job_count += 1;
        m.total_job_time += elapsed;
        m.average_latency = m.total_job_time / m.job_count as u32;
        if !success {
            m.failure_count += 1;
        }
        m.success_rate = (m.job_count - m.failure_count) as f64 / m.job_count as f64;
    }

    /// Records a submission that found no worker in time.
    pub fn record_scheduling_failure(&self) {
        self.write().scheduling_failures += 1;
    }

    /// Registers a worker joining the pool.
    pub fn worker_started(&self) {
        self.write().worker_count += 1;
    }

    /// Registers a worker leaving the pool.
    pub fn worker_exited(&self) {
        let mut m = self.write();
        m.worker_count = m.worker_count.saturating_sub(1);
    }

    /// Marks a worker busy.
    pub fn job_started(&self) {
        self.write().active_workers += 1;
    }

    /// Marks a worker idle again.
    pub fn job_finished(&self) {
        let mut m = self.write();
        m.active_workers = m.active_workers.saturating_sub(1);
    }

    /// Refreshes the queue depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        self.write().queue_depth = depth;
    }

    /// Sets the externally sampled CPU utilization.
    pub fn set_resource_utilization(&self, utilization: f64) {
        self.write().resource_utilization = utilization.clamp(0.0, 1.0);
    }

    /// Stamps the scaler's last action time.
    pub fn mark_scaled(&self, at: Instant) {
        self.write().last_scale = Some(at);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MetricsSnapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MetricsSnapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_updates_average_and_rate() {
        let m = Metrics::new();
        m.record_completion(Duration::from_millis(100), true);
        m.record_completion(Duration::from_millis(300), false);

        let s = m.snapshot();
        assert_eq!(s.job_count, 2);
        assert_eq!(s.failure_count, 1);
        assert_eq!(s.average_latency, Duration::from_millis(200));
        assert!((s.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn worker_gauges_saturate_at_zero() {
        let m = Metrics::new();
        m.worker_exited();
        m.job_finished();
        let s = m.snapshot();
        assert_eq!(s.worker_count, 0);
        assert_eq!(s.active_workers, 0);
    }

    #[test]
    fn load_ratio_uses_worker_floor() {
        let mut s = MetricsSnapshot::default();
        s.queue_depth = 8;
        assert!((s.load_ratio() - 8.0).abs() < f64::EPSILON);
        s.worker_count = 4;
        assert!((s.load_ratio() - 2.0).abs() < f64::EPSILON);
    }
}
