//! # Outcomes and the single-shot handle that delivers them.
//!
//! An [`Outcome`] is the terminal record produced for one submitted job: a
//! tagged value-or-error payload stamped with its creation time and TTL.
//! Outcomes are immutable once stored and shared read-only between the
//! producing worker and all waiters.
//!
//! An [`OutcomeHandle`] is the future side of a submission: it resolves to
//! exactly one outcome, either immediately (already stored, or synthesized
//! at admission) or when the producer stores it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::Reason;

/// Type-erased, shared job payload.
pub type JobValue = Arc<dyn Any + Send + Sync>;

/// Value-or-error payload of an outcome.
#[derive(Clone)]
pub enum Payload {
    /// The job produced a value.
    Value(JobValue),
    /// The job resolved with a terminal error.
    Error(Reason),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Value(_) => f.write_str("Value(<opaque>)"),
            Payload::Error(r) => write!(f, "Error({r})"),
        }
    }
}

/// Terminal record for one submitted job.
#[derive(Clone, Debug)]
pub struct Outcome {
    payload: Payload,
    created_at: Instant,
    ttl: Duration,
}

impl Outcome {
    /// Creates a value outcome stamped now.
    pub fn from_value(value: JobValue, ttl: Duration) -> Self {
        Self {
            payload: Payload::Value(value),
            created_at: Instant::now(),
            ttl,
        }
    }

    /// Creates an error outcome stamped now.
    pub fn from_error(reason: Reason, ttl: Duration) -> Self {
        Self {
            payload: Payload::Error(reason),
            created_at: Instant::now(),
            ttl,
        }
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the value, if this outcome carries one.
    pub fn value(&self) -> Option<&JobValue> {
        match &self.payload {
            Payload::Value(v) => Some(v),
            Payload::Error(_) => None,
        }
    }

    /// Downcasts the value to a concrete type.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use jobfabric::{jobs::value, Outcome};
    ///
    /// let out = Outcome::from_value(value("ok"), Duration::ZERO);
    /// assert_eq!(out.value_of::<&str>(), Some(&"ok"));
    /// assert_eq!(out.value_of::<u32>(), None);
    /// ```
    pub fn value_of<T: 'static>(&self) -> Option<&T> {
        self.value().and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns the error, if this outcome carries one.
    pub fn error(&self) -> Option<&Reason> {
        match &self.payload {
            Payload::Value(_) => None,
            Payload::Error(r) => Some(r),
        }
    }

    /// True when the outcome is an error.
    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    /// When the outcome was stored.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time-to-live; `Duration::ZERO` means the outcome never expires.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True when the TTL window has elapsed at `now`.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.ttl > Duration::ZERO && now.duration_since(self.created_at) > self.ttl
    }
}

/// Single-shot handle resolving to exactly one [`Outcome`].
///
/// Returned by [`Pool::schedule`](crate::Pool::schedule) and
/// [`ResultStore::awaiter`](crate::ResultStore::awaiter). Consuming the
/// handle with [`recv`](OutcomeHandle::recv) yields the outcome; if the pool
/// shuts down first, it yields a [`Reason::Cancelled`] outcome instead.
#[derive(Debug)]
pub struct OutcomeHandle {
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Ready(Outcome),
    Pending(oneshot::Receiver<Outcome>),
}

impl OutcomeHandle {
    /// An already-resolved handle.
    pub(crate) fn ready(outcome: Outcome) -> Self {
        Self {
            state: HandleState::Ready(outcome),
        }
    }

    /// A handle waiting on a registered store waiter.
    pub(crate) fn pending(rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            state: HandleState::Pending(rx),
        }
    }

    /// True when the outcome is available without waiting.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }

    /// Waits for and returns the outcome.
    pub async fn recv(self) -> Outcome {
        match self.state {
            HandleState::Ready(outcome) => outcome,
            HandleState::Pending(rx) => rx
                .await
                .unwrap_or_else(|_| Outcome::from_error(Reason::Cancelled, Duration::ZERO)),
        }
    }
}
