//! # Least-loaded worker selection.
//!
//! [`LoadBalancer`] tracks per-worker active job counts and a moving average
//! of processing latency, and picks the least-loaded worker below capacity.
//! Ties on load fall to latency, where a worker with no recorded latency is
//! treated as fresh and preferred over any measured one.
//!
//! The latency average is an EWMA weighted 4:1 toward the existing value.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::metrics::MetricsSnapshot;
use crate::regulators::Regulator;

struct BalancerState {
    loads: HashMap<u64, f64>,
    latencies: HashMap<u64, Duration>,
    active_workers: u64,
}

/// Load- and latency-aware worker selector.
pub struct LoadBalancer {
    inner: Mutex<BalancerState>,
    worker_capacity: usize,
}

impl LoadBalancer {
    /// Creates a balancer over `worker_count` workers, each admitting at
    /// most `worker_capacity` concurrent jobs.
    pub fn new(worker_count: usize, worker_capacity: usize) -> Self {
        let mut loads = HashMap::with_capacity(worker_count);
        let mut latencies = HashMap::with_capacity(worker_count);
        for id in 0..worker_count as u64 {
            loads.insert(id, 0.0);
            latencies.insert(id, Duration::ZERO);
        }
        Self {
            inner: Mutex::new(BalancerState {
                loads,
                latencies,
                active_workers: worker_count as u64,
            }),
            worker_capacity: worker_capacity.max(1),
        }
    }

    /// Picks the worker to hand the next job to.
    ///
    /// Returns `None` when every worker is at capacity.
    pub fn select_worker(&self) -> Option<u64> {
        let state = self.lock();
        let capacity = self.worker_capacity as f64;
        let mut selected: Option<u64> = None;

        for id in 0..state.active_workers {
            let load = state.loads.get(&id).copied().unwrap_or(0.0);
            if load >= capacity {
                continue;
            }
            let Some(current) = selected else {
                selected = Some(id);
                continue;
            };

            let current_load = state.loads.get(&current).copied().unwrap_or(0.0);
            if load < current_load {
                selected = Some(id);
            } else if load == current_load {
                let lat = state.latencies.get(&id).copied().unwrap_or(Duration::ZERO);
                let cur = state
                    .latencies
                    .get(&current)
                    .copied()
                    .unwrap_or(Duration::ZERO);
                // Fresh (zero latency) beats any measured latency; otherwise
                // the smaller measured latency wins.
                let better = (lat == Duration::ZERO && cur > Duration::ZERO)
                    || (lat > Duration::ZERO && cur > Duration::ZERO && lat < cur);
                if better {
                    selected = Some(id);
                }
            }
        }
        selected
    }

    /// Notes a job starting on `worker_id`.
    pub fn record_job_start(&self, worker_id: u64) {
        let mut state = self.lock();
        if worker_id < state.active_workers {
            *state.loads.entry(worker_id).or_insert(0.0) += 1.0;
        }
    }

    /// Notes a job finishing on `worker_id` after `duration`.
    pub fn record_job_complete(&self, worker_id: u64, duration: Duration) {
        let mut state = self.lock();
        if worker_id >= state.active_workers {
            return;
        }
        let load = state.loads.entry(worker_id).or_insert(0.0);
        *load = (*load - 1.0).max(0.0);

        let latency = state.latencies.entry(worker_id).or_insert(Duration::ZERO);
        *latency = if *latency == Duration::ZERO {
            duration
        } else {
            (*latency * 4 + duration) / 5
        };
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BalancerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Regulator for LoadBalancer {
    /// Resizes the worker table to the observed worker count; new workers
    /// start fresh (zero load, no latency).
    fn observe(&self, metrics: &MetricsSnapshot) {
        let mut state = self.lock();
        let count = metrics.worker_count as u64;
        if count > state.active_workers {
            for id in state.active_workers..count {
                state.loads.entry(id).or_insert(0.0);
                state.latencies.entry(id).or_insert(Duration::ZERO);
            }
        }
        state.active_workers = count.max(1);
    }

    /// True only when every worker is at capacity.
    fn limit(&self) -> bool {
        let state = self.lock();
        let capacity = self.worker_capacity as f64;
        (0..state.active_workers)
            .all(|id| state.loads.get(&id).copied().unwrap_or(0.0) >= capacity)
    }

    /// Clamps any drifted load back into `[0, capacity]`.
    fn renormalize(&self) {
        let mut state = self.lock();
        let capacity = self.worker_capacity as f64;
        for load in state.loads.values_mut() {
            if *load > capacity {
                *load = capacity;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_lowest_load() {
        let lb = LoadBalancer::new(3, 5);
        lb.record_job_start(0);
        lb.record_job_start(0);
        lb.record_job_start(2);
        assert_eq!(lb.select_worker(), Some(1));
    }

    #[test]
    fn never_selects_a_worker_at_capacity() {
        let lb = LoadBalancer::new(2, 1);
        lb.record_job_start(0);
        assert_eq!(lb.select_worker(), Some(1));
        lb.record_job_start(1);
        assert_eq!(lb.select_worker(), None);
        assert!(lb.limit());
    }

    #[test]
    fn tie_prefers_fresh_worker_over_measured_latency() {
        let lb = LoadBalancer::new(2, 5);
        // Worker 0 has a recorded latency; worker 1 is fresh.
        lb.record_job_start(0);
        lb.record_job_complete(0, Duration::from_millis(50));
        assert_eq!(lb.select_worker(), Some(1));
    }

    #[test]
    fn tie_prefers_lower_measured_latency() {
        let lb = LoadBalancer::new(2, 5);
        lb.record_job_start(0);
        lb.record_job_complete(0, Duration::from_millis(80));
        lb.record_job_start(1);
        lb.record_job_complete(1, Duration::from_millis(20));
        assert_eq!(lb.select_worker(), Some(1));
    }

    #[test]
    fn latency_is_a_weighted_moving_average() {
        let lb = LoadBalancer::new(1, 5);
        lb.record_job_start(0);
        lb.record_job_complete(0, Duration::from_millis(100));
        lb.record_job_start(0);
        lb.record_job_complete(0, Duration::from_millis(200));

        // (100 * 4 + 200) / 5 = 120
        let state = lb.lock();
        assert_eq!(
            state.latencies.get(&0).copied().unwrap(),
            Duration::from_millis(120)
        );
    }

    #[test]
    fn observe_grows_the_worker_table() {
        let lb = LoadBalancer::new(1, 2);
        let mut snap = MetricsSnapshot::default();
        snap.worker_count = 3;
        lb.observe(&snap);

        lb.record_job_start(0);
        lb.record_job_start(0);
        assert_eq!(lb.select_worker(), Some(1));
    }

    #[test]
    fn renormalize_clamps_drifted_loads() {
        let lb = LoadBalancer::new(1, 2);
        for _ in 0..5 {
            lb.record_job_start(0);
        }
        lb.renormalize();
        let state = lb.lock();
        assert_eq!(state.loads.get(&0).copied().unwrap(), 2.0);
    }
}
