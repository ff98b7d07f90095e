use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::{PoolConfig, ScalerConfig};
use crate::error::{JobError, Reason};
use crate::events::EventKind;
use crate::jobs::{value, JobFn, JobOptions};
use crate::circuit::CircuitConfig;
use crate::policies::{ExponentialBackoff, FixedDelay};
use crate::pool::Pool;

/// Config with test-friendly cadences: fast sweeps, fast pulses, short
/// dependency waits.
fn test_config() -> PoolConfig {
    PoolConfig {
        scheduling_timeout: Duration::from_secs(5),
        dependency_timeout: Duration::from_millis(100),
        cleanup_interval: Duration::from_millis(50),
        metrics_interval: Duration::from_millis(20),
        regulator_interval: Duration::from_millis(50),
        ..PoolConfig::default()
    }
}

fn new_pool(min: usize, max: usize) -> Pool {
    Pool::new(CancellationToken::new(), min, max, test_config())
}

#[tokio::test]
async fn simple_job_resolves_with_its_value() {
    let pool = new_pool(2, 5);

    let handle = pool
        .schedule(
            "ok",
            JobFn::arc(|| async { Ok::<_, JobError>(value("success")) }),
            JobOptions::new(),
        )
        .await;

    let outcome = handle.recv().await;
    assert!(!outcome.is_error());
    assert_eq!(outcome.value_of::<&str>(), Some(&"success"));

    let metrics = pool.metrics();
    assert_eq!(metrics.job_count, 1);
    assert_eq!(metrics.failure_count, 0);

    pool.close().await;
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let pool = new_pool(2, 5);
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    let started = Instant::now();
    let handle = pool
        .schedule(
            "retry-job",
            JobFn::arc(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(JobError::fail("temporary error"))
                    } else {
                        Ok(value("success after retry"))
                    }
                }
            }),
            JobOptions::new()
                .with_retry(3, Arc::new(ExponentialBackoff::new(Duration::from_millis(1)))),
        )
        .await;

    let outcome = handle.recv().await;
    assert_eq!(outcome.value_of::<&str>(), Some(&"success after retry"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // Two backoffs: 1ms then 2ms.
    assert!(started.elapsed() >= Duration::from_millis(3));

    pool.close().await;
}

#[tokio::test]
async fn exhausted_retries_surface_the_user_error() {
    let pool = new_pool(1, 2);

    let handle = pool
        .schedule(
            "always-fails",
            JobFn::arc(|| async { Err::<crate::jobs::JobValue, _>(JobError::fail("boom")) }),
            JobOptions::new()
                .with_retry(2, Arc::new(FixedDelay::new(Duration::from_millis(1)))),
        )
        .await;

    let outcome = handle.recv().await;
    assert!(matches!(
        outcome.error(),
        Some(Reason::JobFailed { reason }) if reason.contains("boom")
    ));

    let metrics = pool.metrics();
    assert_eq!(metrics.job_count, 1);
    assert_eq!(metrics.failure_count, 1);

    pool.close().await;
}

#[tokio::test]
async fn open_circuit_rejects_synchronously_without_invoking_the_callable() {
    let pool = new_pool(2, 5);
    let circuit = CircuitConfig {
        max_failures: 2,
        reset_timeout: Duration::from_millis(100),
        half_open_max: 1,
    };

    for id in ["c1", "c2"] {
        let handle = pool
            .schedule(
                id,
                JobFn::arc(|| async { Err::<crate::jobs::JobValue, _>(JobError::fail("down")) }),
                JobOptions::new()
                    .with_retry(1, Arc::new(FixedDelay::new(Duration::from_millis(1))))
                    .with_circuit_breaker("api", circuit),
            )
            .await;
        assert!(handle.recv().await.is_error());
    }

    // Third submission: denied at the gate, callable never runs.
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();
    let handle = pool
        .schedule(
            "c3",
            JobFn::arc(move || {
                flag.store(true, Ordering::SeqCst);
                async { Ok::<_, JobError>(value(())) }
            }),
            JobOptions::new().with_circuit_breaker("api", circuit),
        )
        .await;
    assert!(handle.is_ready());
    assert_eq!(
        handle.recv().await.error(),
        Some(&Reason::CircuitOpen {
            circuit: "api".into()
        })
    );
    assert!(!invoked.load(Ordering::SeqCst));

    // After the reset timeout the circuit admits a probe again.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let handle = pool
        .schedule(
            "c4",
            JobFn::arc(|| async { Ok::<_, JobError>(value("recovered")) }),
            JobOptions::new().with_circuit_breaker("api", circuit),
        )
        .await;
    assert_eq!(handle.recv().await.value_of::<&str>(), Some(&"recovered"));

    pool.close().await;
}

#[tokio::test]
async fn worker_level_circuit_deny_skips_job_metrics() {
    // One worker, FIFO queue: a blocker holds the worker while the failing
    // jobs and the target are all submitted against a still-closed breaker,
    // so the target passes the submission gate and is denied only when the
    // worker re-checks admission.
    let pool = new_pool(1, 1);
    let circuit = CircuitConfig {
        max_failures: 2,
        reset_timeout: Duration::from_secs(60),
        half_open_max: 1,
    };

    let blocker = pool
        .schedule(
            "blocker",
            JobFn::arc(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, JobError>(value(()))
            }),
            JobOptions::new(),
        )
        .await;

    for id in ["f1", "f2"] {
        let _ = pool
            .schedule(
                id,
                JobFn::arc(|| async { Err::<crate::jobs::JobValue, _>(JobError::fail("down")) }),
                JobOptions::new()
                    .with_retry(1, Arc::new(FixedDelay::new(Duration::from_millis(1))))
                    .with_circuit_breaker("gate", circuit),
            )
            .await;
    }

    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();
    let target = pool
        .schedule(
            "target",
            JobFn::arc(move || {
                flag.store(true, Ordering::SeqCst);
                async { Ok::<_, JobError>(value(())) }
            }),
            JobOptions::new().with_circuit_breaker("gate", circuit),
        )
        .await;
    // The breaker was still closed at submission time.
    assert!(!target.is_ready());

    assert!(!blocker.recv().await.is_error());
    assert_eq!(
        target.recv().await.error(),
        Some(&Reason::CircuitOpen {
            circuit: "gate".into()
        })
    );
    assert!(!invoked.load(Ordering::SeqCst));

    // Only the blocker and the two failures count; the denial is invisible
    // to job metrics.
    let metrics = pool.metrics();
    assert_eq!(metrics.job_count, 3);
    assert_eq!(metrics.failure_count, 2);

    pool.close().await;
}

#[tokio::test]
async fn child_runs_after_its_dependency_resolves() {
    let pool = new_pool(2, 5);

    let parent = pool
        .schedule(
            "parent",
            JobFn::arc(|| async { Ok::<_, JobError>(value("p")) }),
            JobOptions::new(),
        )
        .await;
    assert_eq!(parent.recv().await.value_of::<&str>(), Some(&"p"));

    let child = pool
        .schedule(
            "child",
            JobFn::arc(|| async { Ok::<_, JobError>(value("c")) }),
            JobOptions::new().with_dependencies(["parent"]),
        )
        .await;
    assert_eq!(child.recv().await.value_of::<&str>(), Some(&"c"));

    pool.close().await;
}

#[tokio::test]
async fn failed_dependency_fails_the_child_without_invoking_it() {
    let pool = new_pool(2, 5);

    let parent = pool
        .schedule(
            "parent-err",
            JobFn::arc(|| async { Err::<crate::jobs::JobValue, _>(JobError::fail("broken")) }),
            JobOptions::new().with_retry(1, Arc::new(FixedDelay::new(Duration::from_millis(1)))),
        )
        .await;
    assert!(parent.recv().await.is_error());

    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();
    let child = pool
        .schedule(
            "child-of-err",
            JobFn::arc(move || {
                flag.store(true, Ordering::SeqCst);
                async { Ok::<_, JobError>(value(())) }
            }),
            JobOptions::new().with_dependencies(["parent-err"]),
        )
        .await;

    assert_eq!(
        child.recv().await.error(),
        Some(&Reason::DependencyFailed {
            dependency: "parent-err".into()
        })
    );
    assert!(!invoked.load(Ordering::SeqCst));

    pool.close().await;
}

#[tokio::test]
async fn absent_dependency_fails_after_the_bounded_wait() {
    let pool = new_pool(1, 2);

    let started = Instant::now();
    let handle = pool
        .schedule(
            "orphan",
            JobFn::arc(|| async { Ok::<_, JobError>(value(())) }),
            JobOptions::new().with_dependencies(["ghost"]),
        )
        .await;

    assert_eq!(
        handle.recv().await.error(),
        Some(&Reason::DependencyFailed {
            dependency: "ghost".into()
        })
    );
    // One attempt bounded by the dependency timeout.
    assert!(started.elapsed() >= Duration::from_millis(100));

    pool.close().await;
}

#[tokio::test]
async fn stored_outcome_is_evicted_after_its_ttl() {
    let pool = new_pool(2, 5);

    let handle = pool
        .schedule(
            "t",
            JobFn::arc(|| async { Ok::<_, JobError>(value("short-lived")) }),
            JobOptions::new().with_ttl(Duration::from_millis(100)),
        )
        .await;
    assert!(!handle.recv().await.is_error());
    assert!(pool.results().exists("t"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!pool.results().exists("t"));

    pool.close().await;
}

#[tokio::test]
async fn queue_pressure_grows_the_worker_set() {
    let mut cfg = test_config();
    cfg.scaler = ScalerConfig {
        target_load: 2.0,
        scale_up_threshold: 4.0,
        scale_down_threshold: 0.1,
        cooldown: Duration::from_millis(500),
    };
    let pool = Pool::new(CancellationToken::new(), 2, 10, cfg);

    for i in 0..20 {
        let _ = pool
            .schedule(
                format!("load-{i}"),
                JobFn::arc(|| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, JobError>(value(()))
                }),
                JobOptions::new(),
            )
            .await;
    }

    // Sampler picks up the queue depth, the pulse feeds the scaler.
    let mut grew = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if pool.metrics().worker_count > 2 {
            grew = true;
            break;
        }
    }
    assert!(grew, "worker count never exceeded the minimum under load");

    pool.close().await;
}

#[tokio::test]
async fn equal_bounds_disable_scaling() {
    let mut cfg = test_config();
    cfg.scaler.cooldown = Duration::from_millis(50);
    let pool = Pool::new(CancellationToken::new(), 3, 3, cfg);

    for i in 0..10 {
        let _ = pool
            .schedule(
                format!("steady-{i}"),
                JobFn::arc(|| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, JobError>(value(()))
                }),
                JobOptions::new(),
            )
            .await;
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pool.metrics().worker_count, 3);

    pool.close().await;
}

#[tokio::test]
async fn zero_scheduling_timeout_fails_unenqueueable_submissions() {
    let mut cfg = test_config();
    cfg.scheduling_timeout = Duration::ZERO;
    // One worker: queue capacity is 10.
    let pool = Pool::new(CancellationToken::new(), 1, 1, cfg);

    let mut rejected = 0;
    for i in 0..20 {
        let handle = pool
            .schedule(
                format!("burst-{i}"),
                JobFn::arc(|| async { Ok::<_, JobError>(value(())) }),
                JobOptions::new(),
            )
            .await;
        if handle.is_ready() {
            let outcome = handle.recv().await;
            if matches!(outcome.error(), Some(Reason::SchedulingTimeout { .. })) {
                rejected += 1;
            }
        }
    }

    assert!(rejected > 0, "burst never overflowed the queue");
    assert!(pool.metrics().scheduling_failures >= rejected);

    pool.close().await;
}

#[tokio::test]
async fn panicking_callable_surfaces_as_a_failed_outcome() {
    let pool = new_pool(1, 2);

    let handle = pool
        .schedule(
            "explodes",
            JobFn::arc(|| async {
                panic!("callable blew up");
                #[allow(unreachable_code)]
                Ok::<_, JobError>(value(()))
            }),
            JobOptions::new(),
        )
        .await;
    assert!(matches!(
        handle.recv().await.error(),
        Some(Reason::JobFailed { reason }) if reason.contains("panicked")
    ));

    // The worker survived and keeps processing.
    let handle = pool
        .schedule(
            "after-panic",
            JobFn::arc(|| async { Ok::<_, JobError>(value("fine")) }),
            JobOptions::new(),
        )
        .await;
    assert_eq!(handle.recv().await.value_of::<&str>(), Some(&"fine"));

    pool.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_cancels_pending_work() {
    let pool = new_pool(1, 2);

    // Park a job in backoff so shutdown interrupts it.
    let handle = pool
        .schedule(
            "parked",
            JobFn::arc(|| async { Err::<crate::jobs::JobValue, _>(JobError::fail("flaky")) }),
            JobOptions::new().with_retry(5, Arc::new(FixedDelay::new(Duration::from_secs(30)))),
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.close().await;
    pool.close().await;

    assert_eq!(handle.recv().await.error(), Some(&Reason::Cancelled));

    // Submissions after close resolve cancelled without touching the queue.
    let late = pool
        .schedule(
            "late",
            JobFn::arc(|| async { Ok::<_, JobError>(value(())) }),
            JobOptions::new(),
        )
        .await;
    assert!(late.is_ready());
    assert_eq!(late.recv().await.error(), Some(&Reason::Cancelled));
}

#[tokio::test]
async fn job_ttl_bounds_the_execution_deadline() {
    let pool = new_pool(1, 2);

    let handle = pool
        .schedule(
            "slowpoke",
            JobFn::arc(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, JobError>(value(()))
            }),
            JobOptions::new().with_ttl(Duration::from_millis(100)),
        )
        .await;

    assert_eq!(
        handle.recv().await.error(),
        Some(&Reason::JobTimedOut {
            id: "slowpoke".into()
        })
    );

    pool.close().await;
}

#[tokio::test]
async fn lifecycle_events_are_published_in_order() {
    let pool = new_pool(1, 2);
    let mut events = pool.subscribe();

    let handle = pool
        .schedule(
            "observed",
            JobFn::arc(|| async { Ok::<_, JobError>(value(())) }),
            JobOptions::new(),
        )
        .await;
    assert!(!handle.recv().await.is_error());

    let mut saw_scheduled = None;
    let mut saw_completed = None;
    while let Ok(ev) = events.try_recv() {
        if ev.job.as_deref() == Some("observed") {
            match ev.kind {
                EventKind::JobScheduled => saw_scheduled = Some(ev.seq),
                EventKind::JobCompleted => saw_completed = Some(ev.seq),
                _ => {}
            }
        }
    }
    let (scheduled, completed) = (saw_scheduled.unwrap(), saw_completed.unwrap());
    assert!(scheduled < completed);

    pool.close().await;
}

#[tokio::test]
async fn self_dependency_fails_immediately() {
    let pool = new_pool(1, 2);

    let started = Instant::now();
    let handle = pool
        .schedule(
            "ouroboros",
            JobFn::arc(|| async { Ok::<_, JobError>(value(())) }),
            JobOptions::new().with_dependencies(["ouroboros"]),
        )
        .await;

    assert_eq!(
        handle.recv().await.error(),
        Some(&Reason::DependencyFailed {
            dependency: "ouroboros".into()
        })
    );
    // No bounded wait burned: the cycle is detected up front.
    assert!(started.elapsed() < Duration::from_millis(100));

    pool.close().await;
}
