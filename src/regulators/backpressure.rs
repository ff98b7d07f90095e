//! # Back-pressure regulator.
//!
//! [`BackPressure`] condenses queue depth and average latency into a single
//! pressure reading in `[0, 1]` and blocks intake when it crosses the limit
//! threshold. Pressure bleeds off gradually, and only while both inputs are
//! genuinely recovering, so a brief dip under load does not reopen the gate.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::metrics::MetricsSnapshot;
use crate::regulators::Regulator;

/// Pressure at or above which intake is limited.
const PRESSURE_LIMIT: f64 = 0.8;
/// Pressure removed by one recovery step.
const PRESSURE_STEP: f64 = 0.1;
/// Weight of the queue component.
const QUEUE_WEIGHT: f64 = 0.6;
/// Weight of the latency component.
const LATENCY_WEIGHT: f64 = 0.4;

struct PressureState {
    pressure: f64,
    observed: Option<MetricsSnapshot>,
}

/// Queue- and latency-driven intake limiter.
pub struct BackPressure {
    inner: RwLock<PressureState>,
    max_queue_size: usize,
    target_process_time: Duration,
}

impl BackPressure {
    /// Creates a regulator that tolerates up to `max_queue_size` queued jobs
    /// and `target_process_time` average latency before pressure saturates.
    pub fn new(max_queue_size: usize, target_process_time: Duration) -> Self {
        Self {
            inner: RwLock::new(PressureState {
                pressure: 0.0,
                observed: None,
            }),
            max_queue_size: max_queue_size.max(1),
            target_process_time: target_process_time.max(Duration::from_nanos(1)),
        }
    }

    /// Current pressure in `[0, 1]`.
    pub fn pressure(&self) -> f64 {
        self.read().pressure
    }

    fn compute(&self, metrics: &MetricsSnapshot) -> f64 {
        let queue_pressure = metrics.queue_depth as f64 / self.max_queue_size as f64;
        let timing_pressure = if metrics.average_latency > Duration::ZERO {
            metrics.average_latency.as_secs_f64() / self.target_process_time.as_secs_f64()
        } else {
            0.0
        };
        (queue_pressure * QUEUE_WEIGHT + timing_pressure * LATENCY_WEIGHT).clamp(0.0, 1.0)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PressureState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PressureState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Regulator for BackPressure {
    fn observe(&self, metrics: &MetricsSnapshot) {
        let mut state = self.write();
        state.pressure = self.compute(metrics);
        state.observed = Some(metrics.clone());
    }

    fn limit(&self) -> bool {
        self.read().pressure >= PRESSURE_LIMIT
    }

    /// Bleeds one step of pressure, but only while the queue is under half
    /// capacity and latency is under target.
    fn renormalize(&self) {
        let mut state = self.write();
        let recovering = state.observed.as_ref().is_some_and(|m| {
            m.queue_depth < self.max_queue_size / 2
                && m.average_latency < self.target_process_time
        });
        if recovering {
            state.pressure = (state.pressure - PRESSURE_STEP).max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(queue_depth: usize, average_latency: Duration) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_depth,
            average_latency,
            ..MetricsSnapshot::default()
        }
    }

    #[test]
    fn pressure_is_weighted_sum() {
        let bp = BackPressure::new(100, Duration::from_secs(1));
        bp.observe(&snapshot(50, Duration::from_millis(500)));
        // 0.6 * 0.5 + 0.4 * 0.5
        assert!((bp.pressure() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn pressure_clamps_to_one() {
        let bp = BackPressure::new(10, Duration::from_millis(10));
        bp.observe(&snapshot(100, Duration::from_secs(5)));
        assert!((bp.pressure() - 1.0).abs() < 1e-9);
        assert!(bp.limit());
    }

    #[test]
    fn limits_at_eighty_percent() {
        let bp = BackPressure::new(100, Duration::from_secs(1));
        bp.observe(&snapshot(100, Duration::from_millis(500)));
        // 0.6 + 0.2 = 0.8, right at the gate
        assert!(bp.limit());

        bp.observe(&snapshot(70, Duration::from_millis(500)));
        assert!(!bp.limit());
    }

    #[test]
    fn renormalize_requires_both_inputs_recovering() {
        let bp = BackPressure::new(100, Duration::from_secs(1));
        bp.observe(&snapshot(100, Duration::from_secs(1)));
        let high = bp.pressure();

        // Queue still above half capacity: no bleed.
        bp.renormalize();
        assert!((bp.pressure() - high).abs() < 1e-9);

        bp.observe(&snapshot(10, Duration::from_millis(100)));
        let before = bp.pressure();
        bp.renormalize();
        assert!((bp.pressure() - (before - 0.1).max(0.0)).abs() < 1e-9);
    }

    #[test]
    fn renormalize_floors_at_zero() {
        let bp = BackPressure::new(100, Duration::from_secs(1));
        bp.observe(&snapshot(1, Duration::from_millis(1)));
        for _ in 0..20 {
            bp.renormalize();
        }
        assert!(bp.pressure() >= 0.0);
    }
}
