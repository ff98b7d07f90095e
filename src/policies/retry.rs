//! # Retry policy: attempt budget, delay strategy, and error filter.
//!
//! [`RetryPolicy`] bundles everything a worker needs to decide whether and
//! when a failed attempt is retried:
//! - `max_attempts` total invocation budget (not retries: `3` means at most
//!   three calls);
//! - `strategy` computes the sleep between attempts;
//! - `filter` optional predicate that can veto a retry for specific errors.
//!
//! Fatal errors ([`JobError::Fatal`]) are never retried regardless of the
//! policy.

use std::sync::Arc;
use std::time::Duration;

use crate::error::JobError;
use crate::policies::{ExponentialBackoff, RetryStrategy};

/// Predicate deciding whether a particular error is worth retrying.
pub type RetryFilter = Arc<dyn Fn(&JobError) -> bool + Send + Sync>;

/// Retry behavior for a job or its dependency waits.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of invocations, including the first.
    pub max_attempts: u32,
    /// Delay strategy between attempts.
    pub strategy: Arc<dyn RetryStrategy>,
    /// Optional veto applied before each retry.
    pub filter: Option<RetryFilter>,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and strategy.
    pub fn new(max_attempts: u32, strategy: Arc<dyn RetryStrategy>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy,
            filter: None,
        }
    }

    /// Single attempt, no retries. Used as the dependency-wait default.
    pub fn once() -> Self {
        Self::new(1, Arc::new(ExponentialBackoff::new(Duration::from_secs(1))))
    }

    /// Attaches a retry filter.
    pub fn with_filter(mut self, filter: RetryFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// True when `err` may be retried after `attempt` invocations.
    pub fn allows_retry(&self, err: &JobError, attempt: u32) -> bool {
        if attempt >= self.max_attempts || !err.is_retryable() {
            return false;
        }
        match &self.filter {
            Some(f) => f(err),
            None => true,
        }
    }

    /// Delay to sleep after `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.strategy.next_delay(attempt)
    }
}

impl Default for RetryPolicy {
    /// Three attempts with exponential backoff starting at one second.
    fn default() -> Self {
        Self::new(3, Arc::new(ExponentialBackoff::new(Duration::from_secs(1))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_total_invocations() {
        let p = RetryPolicy::new(3, Arc::new(ExponentialBackoff::new(Duration::from_millis(1))));
        let e = JobError::fail("boom");
        assert!(p.allows_retry(&e, 1));
        assert!(p.allows_retry(&e, 2));
        assert!(!p.allows_retry(&e, 3));
    }

    #[test]
    fn fatal_errors_are_never_retried() {
        let p = RetryPolicy::default();
        assert!(!p.allows_retry(&JobError::fatal("broken invariant"), 1));
    }

    #[test]
    fn filter_can_veto_retry() {
        let p = RetryPolicy::default()
            .with_filter(Arc::new(|e| !e.to_string().contains("permission")));
        assert!(p.allows_retry(&JobError::fail("timeout"), 1));
        assert!(!p.allows_retry(&JobError::fail("permission denied"), 1));
    }
}
