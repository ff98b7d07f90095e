//! # Circuit breaker: three-state failure suppressor.
//!
//! A [`CircuitBreaker`] cuts work off from a degraded downstream after a run
//! of consecutive failures and probes recovery with a bounded burst.
//!
//! ## State machine
//! ```text
//!             consecutive failures ≥ max_failures
//!   CLOSED ────────────────────────────────────────► OPEN
//!     ▲                                                │ reset_timeout elapsed
//!     │ half_open_max successes                        ▼
//!     └────────────────────────────────────────── HALF_OPEN
//!                              any failure ──► OPEN (opened_at restamped)
//! ```
//!
//! ## Rules
//! - Transitions are serialized per breaker behind its own mutex.
//! - Failure counting in CLOSED is consecutive: any success resets it.
//! - HALF_OPEN admits at most `half_open_max` in-flight probes; only
//!   completed probes advance the success count toward CLOSED.
//! - Failures recorded while already OPEN do not restamp `opened_at`.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::info;

use crate::metrics::MetricsSnapshot;
use crate::regulators::Regulator;

/// Operational mode of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; all requests admitted.
    Closed,
    /// Failure threshold exceeded; all requests denied.
    Open,
    /// Probationary mode admitting a bounded burst of probes.
    HalfOpen,
}

impl CircuitState {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Parameters for one circuit breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    /// Consecutive failures tolerated before the circuit opens.
    pub max_failures: u32,
    /// How long the circuit stays open before probing recovery.
    pub reset_timeout: Duration,
    /// Probes admitted (and successes required) in half-open mode.
    pub half_open_max: u32,
}

impl Default for CircuitConfig {
    /// Five consecutive failures open the circuit for one minute; three
    /// successful probes close it again.
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max: 3,
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_passes: u32,
}

/// One named failure-isolation boundary.
///
/// Owned by the pool and looked up by circuit id; jobs bound to the same id
/// share the breaker.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: CircuitConfig,
}

impl CircuitBreaker {
    /// Creates a breaker in the closed state.
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_passes: 0,
            }),
            config,
        }
    }

    /// The breaker's configuration.
    pub fn config(&self) -> CircuitConfig {
        self.config
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Decides whether a request is admitted.
    ///
    /// An open circuit whose reset timeout has elapsed transitions to
    /// half-open on this call and admits the probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() > self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_passes = 0;
                    info!("circuit breaker half-open, probing recovery");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => inner.half_open_passes < self.config.half_open_max,
        }
    }

    /// Records a successful terminal call.
    ///
    /// Returns the new state when a transition occurred.
    pub fn record_success(&self) -> Option<CircuitState> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_passes += 1;
                if inner.half_open_passes >= self.config.half_open_max {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_passes = 0;
                    inner.opened_at = None;
                    info!("circuit breaker closed after successful probes");
                    return Some(CircuitState::Closed);
                }
                None
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                None
            }
            CircuitState::Open => None,
        }
    }

    /// Records a failed call.
    ///
    /// Returns the new state when a transition occurred.
    pub fn record_failure(&self) -> Option<CircuitState> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.max_failures {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    info!(
                        "circuit breaker opened after {} consecutive failures",
                        inner.consecutive_failures
                    );
                    return Some(CircuitState::Open);
                }
                None
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                info!("circuit breaker reopened from half-open");
                Some(CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    /// Attempts the OPEN to HALF_OPEN transition when the reset timeout has
    /// elapsed.
    pub fn try_reset(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| at.elapsed() > self.config.reset_timeout)
                .unwrap_or(true);
            if elapsed {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_passes = 0;
                info!("circuit breaker half-open, probing recovery");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Regulator for CircuitBreaker {
    fn observe(&self, _metrics: &MetricsSnapshot) {}

    fn limit(&self) -> bool {
        !self.allow()
    }

    fn renormalize(&self) {
        self.try_reset();
    }
}
