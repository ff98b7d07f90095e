//! # Pool configuration.
//!
//! [`PoolConfig`] centralizes the pool's timing knobs, queue sizing inputs,
//! and the optional regulator list. [`ScalerConfig`] holds the adaptive
//! scaler's control parameters.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use jobfabric::{PoolConfig, ScalerConfig};
//!
//! let mut cfg = PoolConfig::default();
//! cfg.scheduling_timeout = Duration::from_secs(2);
//! cfg.scaler.cooldown = Duration::from_millis(500);
//!
//! assert_eq!(cfg.scheduling_timeout, Duration::from_secs(2));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::regulators::Regulator;

/// Global configuration for a pool instance.
///
/// Controls scheduling deadlines, execution deadlines, background task
/// cadence, shutdown grace, event bus capacity, and the regulator stack.
#[derive(Clone)]
pub struct PoolConfig {
    /// Deadline for enqueueing a submission and for finding a ready worker.
    pub scheduling_timeout: Duration,
    /// Default execution deadline per job, retries included.
    /// A job with a nonzero TTL uses its TTL as the deadline instead.
    pub job_timeout: Duration,
    /// Per-attempt bound on a single dependency wait.
    pub dependency_timeout: Duration,
    /// Cadence of the result store's TTL eviction sweep.
    pub cleanup_interval: Duration,
    /// Cadence of the queue depth gauge refresh.
    pub metrics_interval: Duration,
    /// Cadence of the regulator pulse (observe + renormalize).
    pub regulator_interval: Duration,
    /// Maximum time `close()` waits for workers to drain.
    pub grace: Duration,
    /// Capacity of the event bus channel.
    pub bus_capacity: usize,
    /// Adaptive scaler control parameters.
    pub scaler: ScalerConfig,
    /// Additional regulators, consulted in order after the scaler.
    pub regulators: Vec<Arc<dyn Regulator>>,
}

impl Default for PoolConfig {
    /// Provides a default configuration:
    /// - `scheduling_timeout = 5s`
    /// - `job_timeout = 30s`
    /// - `dependency_timeout = 1s` (per attempt)
    /// - `cleanup_interval = 60s`
    /// - `metrics_interval = 500ms`
    /// - `regulator_interval = 1s`
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    /// - no extra regulators
    fn default() -> Self {
        Self {
            scheduling_timeout: Duration::from_secs(5),
            job_timeout: Duration::from_secs(30),
            dependency_timeout: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_millis(500),
            regulator_interval: Duration::from_secs(1),
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            scaler: ScalerConfig::default(),
            regulators: Vec::new(),
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("scheduling_timeout", &self.scheduling_timeout)
            .field("job_timeout", &self.job_timeout)
            .field("dependency_timeout", &self.dependency_timeout)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("metrics_interval", &self.metrics_interval)
            .field("regulator_interval", &self.regulator_interval)
            .field("grace", &self.grace)
            .field("bus_capacity", &self.bus_capacity)
            .field("scaler", &self.scaler)
            .field("regulators", &self.regulators.len())
            .finish()
    }
}

/// Control parameters for the adaptive scaler.
///
/// The load ratio is `queue_depth / worker_count`; the scaler acts when it
/// crosses a threshold and the cooldown has elapsed.
#[derive(Clone, Copy, Debug)]
pub struct ScalerConfig {
    /// Target jobs per worker used to size scaling steps.
    pub target_load: f64,
    /// Load ratio above which the pool grows.
    pub scale_up_threshold: f64,
    /// Load ratio below which the pool shrinks.
    pub scale_down_threshold: f64,
    /// Minimum interval between successive scaling actions.
    pub cooldown: Duration,
}

impl Default for ScalerConfig {
    /// Provides the default control law:
    /// - `target_load = 0.7`
    /// - `scale_up_threshold = 0.8`
    /// - `scale_down_threshold = 0.3`
    /// - `cooldown = 5s`
    fn default() -> Self {
        Self {
            target_load: 0.7,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            cooldown: Duration::from_secs(5),
        }
    }
}
