//! # jobfabric
//!
//! **jobfabric** is an adaptive in-process job execution pool.
//!
//! Callers submit named async jobs and receive a single-shot outcome handle.
//! The pool multiplexes jobs across a dynamically sized worker set,
//! coordinates inter-job dependencies through a keyed result store with TTL
//! eviction, and runs a pluggable stack of regulators against live metrics.
//!
//! ## Features
//!
//! | Area            | Description                                                      | Key types / traits                              |
//! |-----------------|------------------------------------------------------------------|-------------------------------------------------|
//! | **Scheduling**  | Bounded queue, ready-worker hand-off, scheduling deadlines.      | [`Pool`], [`JobOptions`]                        |
//! | **Outcomes**    | Keyed result store, waiter notification, TTL eviction.           | [`ResultStore`], [`Outcome`], [`OutcomeHandle`] |
//! | **Resilience**  | Retries with backoff, per-circuit failure isolation.             | [`RetryPolicy`], [`CircuitBreaker`]             |
//! | **Regulation**  | Rate limiting, back-pressure, load balancing, resource limits.   | [`Regulator`], [`RateLimiter`], [`BackPressure`]|
//! | **Scaling**     | Load-ratio-driven worker growth and shrink with cooldown.        | [`ScalerConfig`]                                |
//! | **Observation** | Broadcast lifecycle events and copyable metrics snapshots.       | [`Event`], [`MetricsSnapshot`]                  |
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use jobfabric::{
//!     jobs::value, ExponentialBackoff, JobError, JobFn, JobOptions, Pool, PoolConfig,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let pool = Pool::new(CancellationToken::new(), 2, 8, PoolConfig::default());
//!
//!     // Submit a job with retries and a result TTL.
//!     let handle = pool
//!         .schedule(
//!             "read-sensor",
//!             JobFn::arc(|| async { Ok::<_, JobError>(value("reading")) }),
//!             JobOptions::new()
//!                 .with_retry(3, Arc::new(ExponentialBackoff::new(Duration::from_millis(50))))
//!                 .with_ttl(Duration::from_secs(60)),
//!         )
//!         .await;
//!
//!     let outcome = handle.recv().await;
//!     assert_eq!(outcome.value_of::<&str>(), Some(&"reading"));
//!
//!     pool.close().await;
//! }
//! ```
//!
//! ---

mod circuit;
mod config;
mod error;
mod events;
pub mod jobs;
mod metrics;
mod policies;
mod pool;
mod regulators;
mod store;

// ---- Public re-exports ----

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState};
pub use config::{PoolConfig, ScalerConfig};
pub use error::{JobError, Reason, StoreClosed};
pub use events::{Event, EventKind};
pub use jobs::{Job, JobCall, JobFn, JobOptions, JobRef, JobValue, Outcome, OutcomeHandle, Payload};
pub use metrics::{Metrics, MetricsSnapshot};
pub use policies::{ExponentialBackoff, FixedDelay, RetryFilter, RetryPolicy, RetryStrategy};
pub use pool::Pool;
pub use regulators::{
    BackPressure, LoadBalancer, MemoryProbe, RateLimiter, Regulator, ResourceGovernor,
};
pub use store::ResultStore;
