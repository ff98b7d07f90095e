//! # Worker: executes one job at a time from a single-slot inbound channel.
//!
//! A worker advertises readiness by publishing its slot sender onto the
//! pool's ready queue, waits for the dispatcher to hand it a job, and runs
//! the job through the processing sequence:
//!
//! ```text
//! loop {
//!   ├─► publish slot on ready queue
//!   ├─► wait {cancellation, job}
//!   └─► process:
//!        1. circuit admission          → CircuitOpen outcome on deny
//!        2. dependency waits           → DependencyFailed after retries
//!        3. attempt loop with backoff  → JobFailed after retries
//!        4. outer deadline             → JobTimedOut
//!        5. record metrics
//!        6. record final circuit success
//!        7. store outcome, publish terminal event
//! }
//! ```
//!
//! ## Rules
//! - Cancellation is honored at every wait between steps (idle slot,
//!   dependency waits, backoff sleeps) and produces a `Cancelled` outcome.
//! - An in-flight callable attempt is never preempted: a worker removed
//!   mid-job finishes the attempt, stores the outcome, and exits on the next
//!   loop iteration.
//! - An admission denial goes straight to step 7: the outcome is stored but
//!   no job metrics are recorded, the same as the pool-level admission
//!   failures.
//! - Each failed attempt records one circuit failure; only the final
//!   success records a circuit success.
//! - A panicking callable is caught and surfaces as a terminal `JobFailed`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::circuit::{CircuitBreaker, CircuitState};
use crate::error::{JobError, Reason};
use crate::events::{Bus, Event, EventKind};
use crate::jobs::{Job, JobValue};
use crate::metrics::Metrics;
use crate::store::ResultStore;

/// Shared pool internals a worker operates through.
///
/// A non-owning view: workers never hold the pool itself, so the ownership
/// tree stays acyclic and `close()` can join them safely.
pub(crate) struct WorkerContext {
    pub(crate) store: Arc<ResultStore>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) breakers: Arc<dashmap::DashMap<String, Arc<CircuitBreaker>>>,
    pub(crate) bus: Bus,
    pub(crate) dependency_timeout: Duration,
    pub(crate) job_timeout: Duration,
}

/// One job-at-a-time executor owned by the pool.
pub(crate) struct Worker {
    id: u64,
    ctx: Arc<WorkerContext>,
    ready_tx: mpsc::Sender<mpsc::Sender<Job>>,
    cancel: CancellationToken,
}

impl Worker {
    pub(crate) fn new(
        id: u64,
        ctx: Arc<WorkerContext>,
        ready_tx: mpsc::Sender<mpsc::Sender<Job>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            ctx,
            ready_tx,
            cancel,
        }
    }

    /// Runs until cancelled or the pool's queues close.
    pub(crate) async fn run(self) {
        let (slot_tx, mut slot_rx) = mpsc::channel::<Job>(1);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let published = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.ready_tx.send(slot_tx.clone()) => res.is_ok(),
            };
            if !published {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    // The dispatcher may have already placed a job in the
                    // published slot. Close the slot so no further hand-off
                    // can succeed, then drain and finish what arrived.
                    slot_rx.close();
                    while let Ok(job) = slot_rx.try_recv() {
                        self.process(job).await;
                    }
                    break;
                }
                job = slot_rx.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => break,
                }
            }
        }

        self.ctx.metrics.worker_exited();
        self.ctx
            .bus
            .publish(Event::now(EventKind::WorkerExited).with_worker(self.id));
        debug!("worker {} exited", self.id);
    }

    /// Runs one job through the full processing sequence and stores its
    /// outcome.
    async fn process(&self, job: Job) {
        let started = Instant::now();
        self.ctx.bus.publish(
            Event::now(EventKind::JobStarting)
                .with_job(&job.id)
                .with_worker(self.id),
        );

        let result = self.execute(&job).await;
        let denied = result.as_ref().err().is_some_and(|r| r.is_admission());
        let success = result.is_ok();

        // Step 5: an admission denial never touches job metrics; the
        // callable did not run.
        if !denied {
            self.ctx.metrics.record_completion(started.elapsed(), success);
        }
        if success {
            if let Some(breaker) = self.breaker_for(&job) {
                if breaker.record_success() == Some(CircuitState::Closed) {
                    self.publish_circuit(&job, EventKind::CircuitClosed);
                }
            }
        }

        let stored = match result {
            Ok(value) => {
                debug!("worker {} completed job '{}'", self.id, job.id);
                self.ctx.bus.publish(
                    Event::now(EventKind::JobCompleted)
                        .with_job(&job.id)
                        .with_worker(self.id),
                );
                self.ctx.store.store(&job.id, value, job.ttl)
            }
            Err(reason) => {
                debug!(
                    "worker {} failed job '{}': {}",
                    self.id,
                    job.id,
                    reason.as_label()
                );
                self.ctx.bus.publish(
                    Event::now(EventKind::JobFailed)
                        .with_job(&job.id)
                        .with_worker(self.id)
                        .with_error(reason.as_label()),
                );
                self.ctx.store.store_error(&job.id, reason, job.ttl)
            }
        };
        if stored.is_err() {
            warn!("result store closed before job '{}' could record", job.id);
        }
    }

    /// Steps 1 through 4: admission, then the guarded execution phase.
    async fn execute(&self, job: &Job) -> Result<JobValue, Reason> {
        if let Some(binding) = &job.circuit {
            let breaker = self.breaker_named(&binding.id, || binding.config);
            if !breaker.allow() {
                return Err(Reason::CircuitOpen {
                    circuit: binding.id.clone(),
                });
            }
        }

        // The busy gauge brackets only work that was admitted.
        self.ctx.metrics.job_started();
        let result = self.run_admitted(job).await;
        self.ctx.metrics.job_finished();
        result
    }

    /// Steps 2 through 4: dependency waits, retries, outer deadline.
    async fn run_admitted(&self, job: &Job) -> Result<JobValue, Reason> {
        for dependency in &job.dependencies {
            if let Err(reason) = self.await_dependency(job, dependency).await {
                if !matches!(reason, Reason::Cancelled) {
                    self.record_circuit_failure(job);
                }
                return Err(reason);
            }
        }

        let deadline = if job.ttl > Duration::ZERO {
            job.ttl
        } else {
            self.ctx.job_timeout
        };
        match time::timeout(deadline, self.attempt_loop(job)).await {
            Ok(result) => result,
            Err(_) => {
                self.record_circuit_failure(job);
                Err(Reason::JobTimedOut { id: job.id.clone() })
            }
        }
    }

    /// Step 2: waits for one dependency under the per-attempt bound,
    /// retrying per the job's dependency policy.
    async fn await_dependency(&self, job: &Job, dependency: &str) -> Result<(), Reason> {
        if dependency == job.id {
            // A job can never resolve its own outcome.
            return Err(Reason::DependencyFailed {
                dependency: dependency.to_string(),
            });
        }

        let policy = &job.dependency_retry;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let waited = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Reason::Cancelled),
                res = time::timeout(
                    self.ctx.dependency_timeout,
                    self.ctx.store.awaiter(dependency).recv(),
                ) => res,
            };

            match waited {
                Ok(outcome) if !outcome.is_error() => return Ok(()),
                Ok(outcome) if outcome.error() == Some(&Reason::Cancelled) => {
                    return Err(Reason::Cancelled);
                }
                // Errored dependency or wait timeout: retry per policy.
                _ => {
                    if attempt >= policy.max_attempts {
                        return Err(Reason::DependencyFailed {
                            dependency: dependency.to_string(),
                        });
                    }
                    let delay = policy.delay_after(attempt);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(Reason::Cancelled),
                        _ = time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Step 3: invokes the callable with retries and backoff.
    async fn attempt_loop(&self, job: &Job) -> Result<JobValue, Reason> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = std::panic::AssertUnwindSafe(job.call.call())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(JobError::Fatal {
                        reason: "job callable panicked".into(),
                    })
                });

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            self.record_circuit_failure(job);
            if !job.retry.allows_retry(&err, attempt) {
                return Err(Reason::JobFailed {
                    reason: err.to_string(),
                });
            }

            let delay = job.retry.delay_after(attempt);
            self.ctx.bus.publish(
                Event::now(EventKind::BackoffScheduled)
                    .with_job(&job.id)
                    .with_attempt(attempt)
                    .with_delay(delay)
                    .with_error(err.to_string()),
            );
            debug!(
                "worker {} backing off {:?} after attempt {} of job '{}'",
                self.id, delay, attempt, job.id
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Reason::Cancelled),
                _ = time::sleep(delay) => {}
            }
        }
    }

    /// Looks up the job's breaker without creating one.
    fn breaker_for(&self, job: &Job) -> Option<Arc<CircuitBreaker>> {
        job.circuit
            .as_ref()
            .and_then(|binding| self.ctx.breakers.get(&binding.id).map(|b| b.value().clone()))
    }

    /// Looks up a breaker by id, creating it with `config` on first use.
    fn breaker_named(
        &self,
        id: &str,
        config: impl FnOnce() -> crate::circuit::CircuitConfig,
    ) -> Arc<CircuitBreaker> {
        self.ctx
            .breakers
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(config())))
            .value()
            .clone()
    }

    fn record_circuit_failure(&self, job: &Job) {
        if let Some(breaker) = self.breaker_for(job) {
            if breaker.record_failure() == Some(CircuitState::Open) {
                self.publish_circuit(job, EventKind::CircuitOpened);
            }
        }
    }

    fn publish_circuit(&self, job: &Job, kind: EventKind) {
        if let Some(binding) = &job.circuit {
            self.ctx
                .bus
                .publish(Event::now(kind).with_circuit(&binding.id).with_job(&job.id));
        }
    }
}
