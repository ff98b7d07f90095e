//! # Adaptive scaler: the regulator that mutates the worker set.
//!
//! [`AdaptiveScaler`] watches the load ratio (queued jobs per worker) and
//! grows or shrinks the pool between its worker bounds, subject to a
//! cooldown between actions. It holds only a weak reference to the pool, so
//! the pool's ownership of its regulator stack never forms a cycle.
//!
//! The control law itself is a pure function ([`plan`]) over a metrics
//! snapshot:
//!
//! - load above `scale_up_threshold` and room to grow: add
//!   `min(max - workers, ceil(queue / target_load))` workers;
//! - load below `scale_down_threshold` and room to shrink: remove
//!   `min(workers - min, max(1, (workers - needed) / 2))` workers, newest
//!   first, where `needed = max(ceil(queue / target_load), min)`.

use std::sync::{Mutex, PoisonError, Weak};
use std::time::Instant;

use log::info;

use crate::config::ScalerConfig;
use crate::events::{Event, EventKind};
use crate::metrics::MetricsSnapshot;
use crate::pool::PoolCore;
use crate::regulators::Regulator;

/// One scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScaleAction {
    /// Start this many workers.
    Up(usize),
    /// Stop this many workers, newest first.
    Down(usize),
}

/// Computes the scaling action for a snapshot, if any.
pub(crate) fn plan(
    min_workers: usize,
    max_workers: usize,
    cfg: &ScalerConfig,
    metrics: &MetricsSnapshot,
) -> Option<ScaleAction> {
    let workers = metrics.worker_count.max(1);
    let queue = metrics.queue_depth;
    let load = queue as f64 / workers as f64;

    if load > cfg.scale_up_threshold && workers < max_workers {
        let needed = (queue as f64 / cfg.target_load).ceil() as usize;
        let to_add = needed.min(max_workers - workers);
        return (to_add > 0).then_some(ScaleAction::Up(to_add));
    }

    if load < cfg.scale_down_threshold && workers > min_workers {
        let needed = ((queue as f64 / cfg.target_load).ceil() as usize).max(min_workers);
        let to_remove = (workers - min_workers).min((workers.saturating_sub(needed) / 2).max(1));
        return (to_remove > 0).then_some(ScaleAction::Down(to_remove));
    }

    None
}

struct ScalerState {
    last_scale: Option<Instant>,
    observed: Option<MetricsSnapshot>,
}

/// Load-ratio-driven worker set controller.
pub struct AdaptiveScaler {
    inner: Mutex<ScalerState>,
    pool: Weak<PoolCore>,
    min_workers: usize,
    max_workers: usize,
    cfg: ScalerConfig,
}

impl AdaptiveScaler {
    pub(crate) fn new(
        pool: Weak<PoolCore>,
        min_workers: usize,
        max_workers: usize,
        cfg: ScalerConfig,
    ) -> Self {
        Self {
            inner: Mutex::new(ScalerState {
                last_scale: None,
                observed: None,
            }),
            pool,
            min_workers,
            max_workers,
            cfg,
        }
    }

    fn evaluate(&self) {
        let mut state = self.lock();
        if let Some(last) = state.last_scale {
            if last.elapsed() < self.cfg.cooldown {
                return;
            }
        }
        let Some(snapshot) = state.observed.as_ref() else {
            return;
        };
        let Some(pool) = self.pool.upgrade() else {
            return;
        };

        match plan(self.min_workers, self.max_workers, &self.cfg, snapshot) {
            Some(ScaleAction::Up(n)) => {
                let started = pool.start_workers(n);
                if started > 0 {
                    let now = Instant::now();
                    state.last_scale = Some(now);
                    pool.metrics.mark_scaled(now);
                    pool.bus
                        .publish(Event::now(EventKind::ScaledUp).with_count(started));
                    info!(
                        "scaled up by {started} worker(s) to {}",
                        pool.registered_workers()
                    );
                }
            }
            Some(ScaleAction::Down(n)) => {
                let removed = pool.stop_workers(n);
                if removed > 0 {
                    let now = Instant::now();
                    state.last_scale = Some(now);
                    pool.metrics.mark_scaled(now);
                    pool.bus
                        .publish(Event::now(EventKind::ScaledDown).with_count(removed));
                    info!(
                        "scaled down by {removed} worker(s) to {}",
                        pool.registered_workers()
                    );
                }
            }
            None => {}
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScalerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Regulator for AdaptiveScaler {
    fn observe(&self, metrics: &MetricsSnapshot) {
        self.lock().observed = Some(metrics.clone());
        self.evaluate();
    }

    /// True only at the worker ceiling with the load still above the
    /// scale-up threshold: the signal for upstream back-pressure.
    fn limit(&self) -> bool {
        let state = self.lock();
        let Some(snapshot) = state.observed.as_ref() else {
            return false;
        };
        snapshot.worker_count >= self.max_workers
            && snapshot.load_ratio() > self.cfg.scale_up_threshold
    }

    fn renormalize(&self) {
        self.evaluate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot(workers: usize, queue: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            worker_count: workers,
            queue_depth: queue,
            ..MetricsSnapshot::default()
        }
    }

    fn cfg(target: f64, up: f64, down: f64) -> ScalerConfig {
        ScalerConfig {
            target_load: target,
            scale_up_threshold: up,
            scale_down_threshold: down,
            cooldown: Duration::from_secs(5),
        }
    }

    #[test]
    fn scales_up_toward_target_load() {
        // 18 queued over 2 workers with target 2 jobs/worker: needs 9, capped
        // by the 8 remaining slots.
        let action = plan(2, 10, &cfg(2.0, 4.0, 1.0), &snapshot(2, 18));
        assert_eq!(action, Some(ScaleAction::Up(8)));
    }

    #[test]
    fn scale_up_respects_the_ceiling() {
        let action = plan(2, 10, &cfg(2.0, 4.0, 1.0), &snapshot(10, 100));
        assert_eq!(action, None);
    }

    #[test]
    fn scales_down_half_the_surplus() {
        // 8 workers, empty queue, floor 2: needed = 2, surplus 6, remove 3.
        let action = plan(2, 10, &cfg(2.0, 4.0, 1.0), &snapshot(8, 0));
        assert_eq!(action, Some(ScaleAction::Down(3)));
    }

    #[test]
    fn scale_down_removes_at_least_one() {
        // Surplus of one rounds down to zero but still removes a worker.
        let action = plan(2, 10, &cfg(2.0, 4.0, 1.0), &snapshot(3, 0));
        assert_eq!(action, Some(ScaleAction::Down(1)));
    }

    #[test]
    fn scale_down_never_goes_below_the_floor() {
        let action = plan(2, 10, &cfg(2.0, 4.0, 1.0), &snapshot(2, 0));
        assert_eq!(action, None);
    }

    #[test]
    fn mid_band_load_holds_steady() {
        // Load of 2 sits between the thresholds.
        let action = plan(2, 10, &cfg(2.0, 4.0, 1.0), &snapshot(4, 8));
        assert_eq!(action, None);
    }

    #[test]
    fn zero_workers_uses_a_floor_of_one() {
        let action = plan(1, 4, &cfg(1.0, 0.5, 0.1), &snapshot(0, 3));
        assert_eq!(action, Some(ScaleAction::Up(3)));
    }
}
