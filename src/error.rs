//! # Error types used by the pool, the result store, and job callables.
//!
//! Three kinds of failure live here:
//!
//! - [`Reason`] terminal error kinds carried inside an [`Outcome`](crate::Outcome).
//!   These are data, not exceptions: admission failures, dependency failures,
//!   execution failures, and shutdown all surface as a stored outcome.
//! - [`JobError`] errors returned by user callables, classified as retryable
//!   ([`JobError::Fail`]) or terminal ([`JobError::Fatal`]).
//! - [`StoreClosed`] returned by store writes after shutdown.
//!
//! All types provide `as_label()` for stable snake_case labels in logs.

use std::time::Duration;

use thiserror::Error;

/// # Terminal error kinds recorded in outcomes.
///
/// Every failed job resolves to exactly one of these. Admission failures
/// (`SchedulingTimeout`, `NoAvailableWorkers`, `CircuitOpen`) are produced
/// before the callable runs; the rest are produced by the worker.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// The submission could not be enqueued before the scheduling deadline.
    #[error("scheduling timed out after {timeout:?}")]
    SchedulingTimeout {
        /// The configured scheduling timeout.
        timeout: Duration,
    },

    /// No worker became ready before the scheduling deadline.
    #[error("no workers available to process job")]
    NoAvailableWorkers,

    /// The job's circuit breaker denied admission.
    #[error("circuit '{circuit}' is open")]
    CircuitOpen {
        /// The circuit id that denied the job.
        circuit: String,
    },

    /// A dependency errored or never materialized within the retry budget.
    #[error("dependency '{dependency}' failed")]
    DependencyFailed {
        /// The dependency id that failed.
        dependency: String,
    },

    /// The job exceeded its execution deadline, retries included.
    #[error("job '{id}' timed out")]
    JobTimedOut {
        /// The timed-out job id.
        id: String,
    },

    /// The callable returned an error after exhausting its retry policy.
    #[error("job failed: {reason}")]
    JobFailed {
        /// Rendered user error.
        reason: String,
    },

    /// The pool shut down before an outcome was produced.
    #[error("cancelled before completion")]
    Cancelled,
}

impl Reason {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Reason::SchedulingTimeout { .. } => "scheduling_timeout",
            Reason::NoAvailableWorkers => "no_available_workers",
            Reason::CircuitOpen { .. } => "circuit_open",
            Reason::DependencyFailed { .. } => "dependency_failed",
            Reason::JobTimedOut { .. } => "job_timed_out",
            Reason::JobFailed { .. } => "job_failed",
            Reason::Cancelled => "cancelled",
        }
    }

    /// True for failures produced before the callable ran.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Reason::SchedulingTimeout { .. }
                | Reason::NoAvailableWorkers
                | Reason::CircuitOpen { .. }
        )
    }
}

/// # Errors produced by job callables.
///
/// A callable either fails transiently ([`JobError::Fail`], eligible for
/// retry) or terminally ([`JobError::Fatal`], never retried regardless of
/// the retry policy).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum JobError {
    /// Execution failed but may succeed if retried.
    #[error("execution failed: {reason}")]
    Fail {
        /// Human-readable failure description.
        reason: String,
    },

    /// Non-recoverable error; short-circuits the retry loop.
    #[error("fatal error (no retry): {reason}")]
    Fatal {
        /// Human-readable failure description.
        reason: String,
    },
}

impl JobError {
    /// Convenience constructor for a retryable failure.
    pub fn fail(reason: impl Into<String>) -> Self {
        JobError::Fail {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for a terminal failure.
    pub fn fatal(reason: impl Into<String>) -> Self {
        JobError::Fatal {
            reason: reason.into(),
        }
    }

    /// Indicates whether the error is safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Fail { .. })
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::Fail { .. } => "job_fail",
            JobError::Fatal { .. } => "job_fatal",
        }
    }
}

/// Returned by store writes after [`ResultStore::close`](crate::ResultStore::close).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("result store is closed")]
pub struct StoreClosed;
