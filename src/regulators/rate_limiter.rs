//! # Token-bucket rate limiter.
//!
//! [`RateLimiter`] holds a bucket of `max_tokens` tokens replenished at one
//! token per `refill_rate`. Each non-limited [`limit`](Regulator::limit)
//! call consumes a token; an empty bucket limits until the next refill.
//! Burst capacity equals the bucket size.
//!
//! Refill rounds to the nearest whole period, so the long-term admission
//! rate stays at exactly one token per `refill_rate` regardless of call
//! timing.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::metrics::MetricsSnapshot;
use crate::regulators::Regulator;

struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

/// Token-bucket regulator.
pub struct RateLimiter {
    inner: Mutex<BucketState>,
    max_tokens: u64,
    refill_rate: Duration,
}

impl RateLimiter {
    /// Creates a limiter with `max_tokens` burst capacity replenished at one
    /// token per `refill_rate`.
    ///
    /// The bucket starts full, with one full refill period already elapsed.
    pub fn new(max_tokens: u64, refill_rate: Duration) -> Self {
        let now = Instant::now();
        Self {
            inner: Mutex::new(BucketState {
                tokens: max_tokens,
                last_refill: now.checked_sub(refill_rate).unwrap_or(now),
            }),
            max_tokens,
            refill_rate,
        }
    }

    /// Tokens currently available.
    pub fn tokens(&self) -> u64 {
        self.lock().tokens
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Adds the whole periods elapsed since the last refill, rounding at the
    /// half-period mark, capped at `max_tokens`. `last_refill` advances only
    /// by the consumed whole periods so fractional remainders carry over.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let to_add = tokens_to_add(elapsed, self.refill_rate);
        if to_add > 0 {
            state.tokens = (u128::from(state.tokens) + to_add).min(u128::from(self.max_tokens)) as u64;
            let periods = to_add.min(u128::from(u32::MAX)) as u32;
            state.last_refill += self.refill_rate.saturating_mul(periods);
        }
    }
}

/// Whole refill periods covered by `elapsed`, rounding at half a period.
fn tokens_to_add(elapsed: Duration, refill_rate: Duration) -> u128 {
    let refill_ns = refill_rate.as_nanos().max(1);
    (elapsed.as_nanos() + refill_ns / 2) / refill_ns
}

impl Regulator for RateLimiter {
    fn observe(&self, _metrics: &MetricsSnapshot) {}

    /// Consumes a token when one is available; limits otherwise.
    fn limit(&self) -> bool {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());
        if state.tokens > 0 {
            state.tokens -= 1;
            return false;
        }
        true
    }

    fn renormalize(&self) {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());
    }
}
