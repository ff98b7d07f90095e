//! # Job submission record and scheduling options.
//!
//! A [`Job`] is the immutable record built from a submission: the callable,
//! the retry policy, an optional circuit binding, the dependency list, and
//! the outcome TTL. Workers own the attempt counter; everything else is
//! fixed at submission time.
//!
//! [`JobOptions`] is the builder passed to [`Pool::schedule`](crate::Pool::schedule):
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use jobfabric::{CircuitConfig, ExponentialBackoff, JobOptions};
//!
//! let opts = JobOptions::new()
//!     .with_retry(3, Arc::new(ExponentialBackoff::new(Duration::from_millis(50))))
//!     .with_circuit_breaker("billing", CircuitConfig::default())
//!     .with_dependencies(["rates", "accounts"])
//!     .with_ttl(Duration::from_secs(60));
//! # let _ = opts;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::circuit::CircuitConfig;
use crate::jobs::call::JobRef;
use crate::policies::{RetryFilter, RetryPolicy, RetryStrategy};

/// Binding of a job to a named circuit breaker.
#[derive(Clone, Debug)]
pub struct CircuitBinding {
    /// Circuit id, shared by every job that names it.
    pub id: String,
    /// Parameters used when the breaker is created on first use.
    pub config: CircuitConfig,
}

/// Immutable submission record.
///
/// Created by the pool from a callable plus [`JobOptions`]; handed to a
/// worker through its inbound slot; dropped once the outcome is stored.
#[derive(Clone)]
pub struct Job {
    pub(crate) id: String,
    pub(crate) call: JobRef,
    pub(crate) retry: RetryPolicy,
    pub(crate) circuit: Option<CircuitBinding>,
    pub(crate) dependencies: Vec<String>,
    pub(crate) dependency_retry: RetryPolicy,
    pub(crate) ttl: Duration,
    pub(crate) submitted_at: Instant,
}

impl Job {
    /// The job id, also the key its outcome is stored under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Outcome time-to-live; `Duration::ZERO` means no expiry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Ids this job waits on before executing.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// When the job was accepted by `schedule`.
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}

/// Builder for per-job scheduling options.
///
/// All options are optional; defaults are three attempts with exponential
/// backoff from one second, no circuit, no dependencies, no TTL.
#[derive(Clone, Default)]
pub struct JobOptions {
    retry: Option<RetryPolicy>,
    filter: Option<RetryFilter>,
    circuit: Option<CircuitBinding>,
    dependencies: Vec<String>,
    dependency_retry: Option<RetryPolicy>,
    ttl: Option<Duration>,
}

impl JobOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the retry budget and delay strategy.
    pub fn with_retry(mut self, max_attempts: u32, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry = Some(RetryPolicy::new(max_attempts, strategy));
        self
    }

    /// Attaches a predicate that can veto retries for specific errors.
    pub fn with_retry_filter(mut self, filter: RetryFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Routes the job through the named circuit breaker, creating it with
    /// `config` on first use.
    pub fn with_circuit_breaker(mut self, id: impl Into<String>, config: CircuitConfig) -> Self {
        self.circuit = Some(CircuitBinding {
            id: id.into(),
            config,
        });
        self
    }

    /// Sets the outcome time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Declares the job ids this job waits on before executing.
    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Configures how dependency waits are retried (default: one attempt).
    pub fn with_dependency_retry(
        mut self,
        max_attempts: u32,
        strategy: Arc<dyn RetryStrategy>,
    ) -> Self {
        self.dependency_retry = Some(RetryPolicy::new(max_attempts, strategy));
        self
    }

    /// Materializes the submission record.
    pub(crate) fn into_job(self, id: String, call: JobRef) -> Job {
        let mut retry = self.retry.unwrap_or_default();
        if let Some(filter) = self.filter {
            retry = retry.with_filter(filter);
        }
        Job {
            id,
            call,
            retry,
            circuit: self.circuit,
            dependencies: self.dependencies,
            dependency_retry: self.dependency_retry.unwrap_or_else(RetryPolicy::once),
            ttl: self.ttl.unwrap_or(Duration::ZERO),
            submitted_at: Instant::now(),
        }
    }
}
