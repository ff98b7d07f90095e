//! # Job callable abstraction and function-backed implementation.
//!
//! This module defines the [`JobCall`] trait (async, value-or-error) and a
//! convenient closure-backed implementation [`JobFn`]. The common handle type
//! is [`JobRef`], an `Arc<dyn JobCall>` suitable for sharing across the pool.
//!
//! A callable returns a type-erased [`JobValue`] so outcomes of any payload
//! type flow through the same store; use [`value`] to box one.

use std::{future::Future, sync::Mutex};

use async_trait::async_trait;

use crate::error::JobError;
use crate::jobs::outcome::JobValue;

/// # Shared handle to a job callable.
///
/// This is the type accepted by [`Pool::schedule`](crate::Pool::schedule).
pub type JobRef = std::sync::Arc<dyn JobCall>;

/// Boxes a payload into a [`JobValue`].
///
/// # Example
/// ```
/// use jobfabric::jobs::value;
///
/// let v = value("price-report");
/// assert_eq!(v.downcast_ref::<&str>(), Some(&"price-report"));
/// ```
pub fn value<T: Send + Sync + 'static>(v: T) -> JobValue {
    std::sync::Arc::new(v)
}

/// # Asynchronous unit of work producing a value or an error.
///
/// Workers may invoke `call` multiple times when the job's retry policy
/// permits, so implementations must tolerate repeated invocation.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use jobfabric::{JobCall, JobError, JobValue};
/// use jobfabric::jobs::value;
///
/// struct ReadSensor;
///
/// #[async_trait]
/// impl JobCall for ReadSensor {
///     async fn call(&self) -> Result<JobValue, JobError> {
///         Ok(value(42u32))
///     }
/// }
/// ```
#[async_trait]
pub trait JobCall: Send + Sync + 'static {
    /// Executes one attempt of the job.
    async fn call(&self) -> Result<JobValue, JobError>;
}

/// # Closure-backed job implementation.
///
/// [`JobFn`] wraps a closure `Fnc: FnMut() -> Fut`. The closure is protected
/// by a [`Mutex`] to allow calling `call(&self)` repeatedly even though the
/// closure is `FnMut`. Use [`JobFn::arc`] for a one-liner that returns a
/// [`JobRef`].
///
/// The mutex is held only while the closure creates the future, never while
/// the future runs, so retries never serialize against in-flight attempts of
/// other jobs sharing the callable.
///
/// # Example
/// ```
/// use jobfabric::{JobFn, JobRef, JobError};
/// use jobfabric::jobs::value;
///
/// let call: JobRef = JobFn::arc(|| async { Ok::<_, JobError>(value("done")) });
/// ```
pub struct JobFn<Fnc, Fut>
where
    Fnc: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<JobValue, JobError>> + Send + 'static,
{
    /// Underlying closure (guarded by a mutex to allow `FnMut` with `&self`).
    func: Mutex<Fnc>,
}

impl<Fnc, Fut> JobFn<Fnc, Fut>
where
    Fnc: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<JobValue, JobError>> + Send + 'static,
{
    /// Creates a new closure-backed callable.
    ///
    /// Prefer [`JobFn::arc`] when you immediately need a [`JobRef`].
    pub fn new(func: Fnc) -> Self {
        Self {
            func: Mutex::new(func),
        }
    }

    /// Creates the callable and returns it as a shared handle.
    pub fn arc(func: Fnc) -> JobRef {
        std::sync::Arc::new(Self::new(func))
    }
}

#[async_trait]
impl<Fnc, Fut> JobCall for JobFn<Fnc, Fut>
where
    Fnc: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<JobValue, JobError>> + Send + 'static,
{
    async fn call(&self) -> Result<JobValue, JobError> {
        let fut = {
            let mut f = self.func.lock().map_err(|_| JobError::Fatal {
                reason: "mutex poisoned".into(),
            })?;
            (f)()
        };
        fut.await
    }
}
