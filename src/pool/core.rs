//! # Pool: job queue, worker registry, dispatch loop, lifecycle.
//!
//! The [`Pool`] owns everything: the bounded job queue, the ready-worker
//! queue, the worker registry, the circuit-breaker table, the result store,
//! the metrics instance, and the regulator stack (adaptive scaler first,
//! then any user regulators).
//!
//! ## Architecture
//! ```text
//! schedule(id, call, opts)
//!     │  circuit gate ──► resolved CircuitOpen handle (no queue use)
//!     ▼
//! [job queue] ──► dispatcher ──► regulator gate ──► [ready queue] ──► worker slot
//!                      │                                   ▲
//!                      └── deadline ► NoAvailableWorkers   └── workers publish
//!
//! background: metrics sampler · regulator pulse · store sweeper
//! ```
//!
//! ## Rules
//! - Queue capacities: jobs `max_workers * 10`, ready `max_workers`.
//! - Submission never blocks past the scheduling timeout; an un-enqueueable
//!   submission resolves to `SchedulingTimeout` without touching the store.
//! - Shutdown: trip cancellation, join dispatcher and background tasks, join
//!   workers (bounded by grace), then close the store so every outstanding
//!   waiter resolves `Cancelled`. Channels close with their owners, after
//!   cancellation, exactly once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::circuit::CircuitBreaker;
use crate::config::PoolConfig;
use crate::error::Reason;
use crate::events::{Bus, Event, EventKind};
use crate::jobs::{Job, JobOptions, JobRef, Outcome, OutcomeHandle};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pool::worker::{Worker, WorkerContext};
use crate::regulators::{AdaptiveScaler, Regulator, RegulatorStack};
use crate::store::ResultStore;

/// Pause between regulator-gate probes while the stack is limiting.
const THROTTLE_TICK: Duration = Duration::from_millis(10);
/// Pause between successive scale-down removals.
const SCALE_DOWN_PAUSE: Duration = Duration::from_millis(50);

/// Handle to a running worker, owned by the registry.
pub(crate) struct WorkerHandle {
    pub(crate) id: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) join: JoinHandle<()>,
}

/// Adaptive in-process job execution pool.
///
/// Cheap to clone; all clones drive the same pool.
///
/// # Example
/// ```no_run
/// use tokio_util::sync::CancellationToken;
/// use jobfabric::{jobs::value, JobError, JobFn, JobOptions, Pool, PoolConfig};
///
/// # async fn demo() {
/// let pool = Pool::new(CancellationToken::new(), 2, 8, PoolConfig::default());
///
/// let handle = pool
///     .schedule(
///         "read-sensor",
///         JobFn::arc(|| async { Ok::<_, JobError>(value("reading")) }),
///         JobOptions::new(),
///     )
///     .await;
///
/// let outcome = handle.recv().await;
/// assert_eq!(outcome.value_of::<&str>(), Some(&"reading"));
/// pool.close().await;
/// # }
/// ```
#[derive(Clone)]
pub struct Pool {
    core: Arc<PoolCore>,
}

pub(crate) struct PoolCore {
    pub(crate) cfg: PoolConfig,
    pub(crate) max_workers: usize,
    pub(crate) token: CancellationToken,
    pub(crate) bus: Bus,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) store: Arc<ResultStore>,
    pub(crate) breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    regulators: RegulatorStack,

    jobs_tx: mpsc::Sender<Job>,
    ready_tx: mpsc::Sender<mpsc::Sender<Job>>,

    workers: Mutex<Vec<WorkerHandle>>,
    next_worker_id: AtomicU64,
    background: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Pool {
    /// Creates a pool and starts `min_workers` workers.
    ///
    /// The pool's lifetime is scoped under `parent`: cancelling it shuts the
    /// pool down as if [`close`](Pool::close) had been called (without the
    /// drain guarantee). Must be called from within a tokio runtime.
    pub fn new(
        parent: CancellationToken,
        min_workers: usize,
        max_workers: usize,
        cfg: PoolConfig,
    ) -> Self {
        let min_workers = min_workers.max(1);
        let max_workers = max_workers.max(min_workers);

        let token = parent.child_token();
        let bus = Bus::new(cfg.bus_capacity);
        let metrics = Arc::new(Metrics::new());
        let store = ResultStore::new(cfg.cleanup_interval);

        let (jobs_tx, jobs_rx) = mpsc::channel(max_workers * 10);
        let (ready_tx, ready_rx) = mpsc::channel(max_workers);

        let core = Arc::new_cyclic(|weak| {
            let scaler: Arc<dyn Regulator> = Arc::new(AdaptiveScaler::new(
                weak.clone(),
                min_workers,
                max_workers,
                cfg.scaler,
            ));
            let mut stack = vec![scaler];
            stack.extend(cfg.regulators.iter().cloned());

            PoolCore {
                max_workers,
                token,
                bus,
                metrics,
                store,
                breakers: Arc::new(DashMap::new()),
                regulators: RegulatorStack::new(stack),
                jobs_tx,
                ready_tx,
                workers: Mutex::new(Vec::new()),
                next_worker_id: AtomicU64::new(0),
                background: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                cfg,
            }
        });

        core.start_workers(min_workers);
        core.spawn_background(jobs_rx, ready_rx);
        info!(
            "pool started with {min_workers} worker(s), scaling up to {max_workers}"
        );
        Self { core }
    }

    /// Submits a job and returns its single-shot outcome handle.
    ///
    /// The handle always resolves to exactly one outcome:
    /// - a known-open circuit resolves it immediately with `CircuitOpen`
    ///   without consuming queue capacity or invoking the callable;
    /// - an un-enqueueable submission resolves it with `SchedulingTimeout`;
    /// - otherwise it resolves when the outcome is stored, or with
    ///   `Cancelled` if the pool shuts down first.
    pub async fn schedule(
        &self,
        id: impl Into<String>,
        call: JobRef,
        opts: JobOptions,
    ) -> OutcomeHandle {
        let id = id.into();
        if self.core.closed.load(Ordering::Acquire) || self.core.token.is_cancelled() {
            return OutcomeHandle::ready(Outcome::from_error(Reason::Cancelled, Duration::ZERO));
        }

        let job = opts.into_job(id, call);

        if let Some(binding) = &job.circuit {
            let breaker = self.core.breaker_named(&binding.id, binding.config);
            if !breaker.allow() {
                debug!("job '{}' denied by circuit '{}'", job.id, binding.id);
                return OutcomeHandle::ready(Outcome::from_error(
                    Reason::CircuitOpen {
                        circuit: binding.id.clone(),
                    },
                    job.ttl,
                ));
            }
        }

        let job_id = job.id.clone();
        let ttl = job.ttl;
        let timeout = self.core.cfg.scheduling_timeout;
        let enqueued = if timeout.is_zero() {
            self.core.jobs_tx.try_send(job).is_ok()
        } else {
            self.core.jobs_tx.send_timeout(job, timeout).await.is_ok()
        };

        if !enqueued {
            self.core.metrics.record_scheduling_failure();
            self.core
                .bus
                .publish(Event::now(EventKind::SchedulingFailed).with_job(&job_id));
            warn!("job '{job_id}' not enqueued within {timeout:?}");
            return OutcomeHandle::ready(Outcome::from_error(
                Reason::SchedulingTimeout { timeout },
                ttl,
            ));
        }

        self.core
            .bus
            .publish(Event::now(EventKind::JobScheduled).with_job(&job_id));
        self.core.store.awaiter(&job_id)
    }

    /// Shuts the pool down.
    ///
    /// Idempotent. Trips cancellation, joins the dispatcher and background
    /// tasks, then every worker (bounded by the configured grace), and
    /// finally closes the result store so outstanding waiters resolve
    /// `Cancelled`.
    pub async fn close(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.core
            .bus
            .publish(Event::now(EventKind::ShutdownRequested));
        info!("pool shutting down");
        self.core.token.cancel();

        let background: Vec<JoinHandle<()>> = self.core.lock_background().drain(..).collect();
        let workers: Vec<WorkerHandle> = self.core.lock_workers().drain(..).collect();

        let drain = async {
            for task in background {
                let _ = task.await;
            }
            for worker in workers {
                let _ = worker.join.await;
            }
        };

        match time::timeout(self.core.cfg.grace, drain).await {
            Ok(()) => {
                self.core
                    .bus
                    .publish(Event::now(EventKind::AllStoppedWithin));
            }
            Err(_) => {
                self.core.bus.publish(Event::now(EventKind::GraceExceeded));
                warn!(
                    "grace period {:?} exceeded; abandoning unfinished workers",
                    self.core.cfg.grace
                );
            }
        }

        self.core.store.close();
        info!("pool closed");
    }

    /// Copies the current metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Subscribes to pool lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.core.bus.subscribe()
    }

    /// The pool's result store.
    pub fn results(&self) -> Arc<ResultStore> {
        self.core.store.clone()
    }

    /// Feeds an externally sampled CPU utilization reading (in `[0, 1]`)
    /// into the metrics the regulators observe.
    pub fn set_resource_utilization(&self, utilization: f64) {
        self.core.metrics.set_resource_utilization(utilization);
    }
}

impl PoolCore {
    /// Starts up to `n` workers, bounded by `max_workers`.
    pub(crate) fn start_workers(self: &Arc<Self>, n: usize) -> usize {
        let mut started = 0;
        for _ in 0..n {
            if self.lock_workers().len() >= self.max_workers {
                break;
            }
            self.start_worker();
            started += 1;
        }
        started
    }

    fn start_worker(self: &Arc<Self>) {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.token.child_token();
        let worker = Worker::new(id, self.worker_context(), self.ready_tx.clone(), cancel.clone());

        let join = tokio::spawn(worker.run());
        self.metrics.worker_started();
        self.bus
            .publish(Event::now(EventKind::WorkerStarted).with_worker(id));
        debug!("started worker {id}");

        self.lock_workers().push(WorkerHandle { id, cancel, join });
    }

    /// Removes up to `n` workers, newest first.
    ///
    /// Handles are extracted under the registry lock in one pass; their
    /// cancellation fires outside it, with a short pause between removals.
    /// Workers mid-job are not preempted.
    pub(crate) fn stop_workers(self: &Arc<Self>, n: usize) -> usize {
        let handles: Vec<WorkerHandle> = {
            let mut workers = self.lock_workers();
            let keep = workers.len().saturating_sub(n);
            workers.split_off(keep)
        };
        let removed = handles.len();
        if removed == 0 {
            return 0;
        }

        tokio::spawn(async move {
            for handle in &handles {
                debug!("stopping worker {}", handle.id);
                handle.cancel.cancel();
                time::sleep(SCALE_DOWN_PAUSE).await;
            }
            for handle in handles {
                let _ = handle.join.await;
            }
        });
        removed
    }

    /// Live worker count from the registry.
    pub(crate) fn registered_workers(&self) -> usize {
        self.lock_workers().len()
    }

    /// Looks up a breaker by id, creating it with `config` on first use.
    pub(crate) fn breaker_named(
        &self,
        id: &str,
        config: crate::circuit::CircuitConfig,
    ) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(config)))
            .value()
            .clone()
    }

    fn worker_context(&self) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            breakers: self.breakers.clone(),
            bus: self.bus.clone(),
            dependency_timeout: self.cfg.dependency_timeout,
            job_timeout: self.cfg.job_timeout,
        })
    }

    /// Spawns the dispatcher, the metrics sampler, and the regulator pulse.
    fn spawn_background(
        self: &Arc<Self>,
        jobs_rx: mpsc::Receiver<Job>,
        ready_rx: mpsc::Receiver<mpsc::Sender<Job>>,
    ) {
        let dispatcher = tokio::spawn(self.clone().dispatch_loop(jobs_rx, ready_rx));
        let sampler = tokio::spawn(self.clone().sampler_loop());
        let pulse = tokio::spawn(self.clone().pulse_loop());

        let mut background = self.lock_background();
        background.push(dispatcher);
        background.push(sampler);
        background.push(pulse);
    }

    /// Pulls jobs off the queue and hands each to a ready worker.
    async fn dispatch_loop(
        self: Arc<Self>,
        mut jobs_rx: mpsc::Receiver<Job>,
        mut ready_rx: mpsc::Receiver<mpsc::Sender<Job>>,
    ) {
        loop {
            let job = tokio::select! {
                _ = self.token.cancelled() => break,
                job = jobs_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.dispatch(job, &mut ready_rx).await;
        }
        debug!("dispatcher exited");
    }

    /// Places one job with a ready worker before the scheduling deadline.
    async fn dispatch(&self, mut job: Job, ready_rx: &mut mpsc::Receiver<mpsc::Sender<Job>>) {
        let deadline = time::Instant::now() + self.cfg.scheduling_timeout;

        // Regulator gate: while the stack limits, renormalize and nap. The
        // job stays ours; the deadline still bounds the total wait.
        while !self.regulators.is_empty() && self.regulators.limited() {
            if time::Instant::now() >= deadline {
                self.scheduling_failed(&job);
                return;
            }
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = time::sleep(THROTTLE_TICK) => self.regulators.renormalize_all(),
            }
        }

        loop {
            tokio::select! {
                _ = self.token.cancelled() => return,
                slot = ready_rx.recv() => {
                    let Some(slot) = slot else { return };
                    match slot.try_send(job) {
                        Ok(()) => return,
                        // Slot of an exited worker, or a stale publication:
                        // take the job back and wait for the next one.
                        Err(TrySendError::Closed(j)) | Err(TrySendError::Full(j)) => job = j,
                    }
                }
                _ = time::sleep_until(deadline) => {
                    self.scheduling_failed(&job);
                    return;
                }
            }
        }
    }

    fn scheduling_failed(&self, job: &Job) {
        let _ = self
            .store
            .store_error(&job.id, Reason::NoAvailableWorkers, job.ttl);
        self.metrics.record_scheduling_failure();
        self.bus
            .publish(Event::now(EventKind::SchedulingFailed).with_job(&job.id));
        warn!("no available workers for job '{}'", job.id);
    }

    /// Refreshes the queue depth gauge.
    async fn sampler_loop(self: Arc<Self>) {
        let mut tick = time::interval(self.cfg.metrics_interval);
        tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tick.tick() => {
                    let depth = self.jobs_tx.max_capacity() - self.jobs_tx.capacity();
                    self.metrics.set_queue_depth(depth);
                }
            }
        }
    }

    /// Feeds fresh snapshots to the regulator stack.
    async fn pulse_loop(self: Arc<Self>) {
        let mut tick = time::interval(self.cfg.regulator_interval);
        tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tick.tick() => {
                    let snapshot = self.metrics.snapshot();
                    self.regulators.observe_all(&snapshot);
                    self.regulators.renormalize_all();
                }
            }
        }
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_background(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
