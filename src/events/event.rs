//! # Lifecycle events emitted by the pool, its workers, and the scaler.
//!
//! The [`EventKind`] enum classifies events across four categories:
//! - **Job events**: scheduling and execution flow (scheduled, starting,
//!   completed, failed, backoff, scheduling failure)
//! - **Circuit events**: breaker transitions (opened, closed)
//! - **Worker events**: pool membership (started, exited, scaled up/down)
//! - **Shutdown events**: pool termination
//!
//! The [`Event`] struct carries optional metadata such as the job id, worker
//! id, error label, attempt counter, and backoff delay.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so consumers can re-order events delivered through async
//! channels.
//!
//! ## Example
//! ```
//! use std::time::Duration;
//! use jobfabric::{Event, EventKind};
//!
//! let ev = Event::now(EventKind::JobFailed)
//!     .with_job("fetch-prices")
//!     .with_error("job_failed")
//!     .with_attempt(3);
//!
//! assert_eq!(ev.kind, EventKind::JobFailed);
//! assert_eq!(ev.job.as_deref(), Some("fetch-prices"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of pool events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Job events ===
    /// A submission was accepted into the job queue.
    JobScheduled,
    /// A worker began processing a job.
    JobStarting,
    /// A job resolved with a value.
    JobCompleted,
    /// A job resolved with an error.
    JobFailed,
    /// A retry delay was scheduled after a failed attempt.
    BackoffScheduled,
    /// No worker became ready before the scheduling deadline.
    SchedulingFailed,

    // === Circuit events ===
    /// A circuit breaker transitioned to open.
    CircuitOpened,
    /// A circuit breaker transitioned back to closed.
    CircuitClosed,

    // === Worker events ===
    /// A worker joined the pool.
    WorkerStarted,
    /// A worker left the pool.
    WorkerExited,
    /// The scaler grew the pool.
    ScaledUp,
    /// The scaler shrank the pool.
    ScaledDown,

    // === Shutdown events ===
    /// `Pool::close` was invoked.
    ShutdownRequested,
    /// All workers drained within the grace period.
    AllStoppedWithin,
    /// The grace period elapsed with workers still running.
    GraceExceeded,
}

/// Pool event with optional metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Job id, if applicable.
    pub job: Option<String>,
    /// Worker id, if applicable.
    pub worker: Option<u64>,
    /// Circuit id, if applicable.
    pub circuit: Option<String>,
    /// Error label or message, if the event represents a failure.
    pub error: Option<String>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Backoff delay before retry, if relevant.
    pub delay: Option<Duration>,
    /// Worker count delta for scale events.
    pub count: Option<usize>,
}

impl Event {
    /// Creates a new event of the given kind with the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            job: None,
            worker: None,
            circuit: None,
            error: None,
            attempt: None,
            delay: None,
            count: None,
        }
    }

    /// Attaches a job id.
    pub fn with_job(mut self, id: impl Into<String>) -> Self {
        self.job = Some(id.into());
        self
    }

    /// Attaches a worker id.
    pub fn with_worker(mut self, id: u64) -> Self {
        self.worker = Some(id);
        self
    }

    /// Attaches a circuit id.
    pub fn with_circuit(mut self, id: impl Into<String>) -> Self {
        self.circuit = Some(id.into());
        self
    }

    /// Attaches an error label or message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches an attempt count.
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Attaches a worker count delta.
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(n);
        self
    }
}
