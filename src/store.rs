//! # Keyed result store with waiter notification and TTL eviction.
//!
//! [`ResultStore`] maps job ids to [`Outcome`]s and hands out single-shot
//! waiters for ids that have not resolved yet. Storing an outcome replaces
//! any prior entry for the id and wakes every registered waiter exactly once.
//!
//! ## Architecture
//! ```text
//! store(id, ..) ──► write lock ──► insert outcome
//!                        │             └─► take waiter list
//!                        ▼
//!                  (lock released)
//!                        └─► deliver outcome to each waiter (non-blocking)
//!
//! awaiter(id) ──► live entry?  ──► resolved handle
//!                 otherwise    ──► register oneshot waiter
//!
//! sweeper (background) ──► evict entries past their TTL
//! ```
//!
//! ## Rules
//! - The value map and the waiter map are mutated only under one write lock.
//! - A waiter registered before a `store` call always receives the outcome.
//! - An expired entry is indistinguishable from one that was never stored.
//! - Delivery never blocks: a waiter whose receiver is gone is skipped.
//! - `close` releases every outstanding waiter with a `Cancelled` outcome.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use log::{debug, trace};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Reason, StoreClosed};
use crate::jobs::{JobValue, Outcome, OutcomeHandle};

struct StoreInner {
    values: HashMap<String, Outcome>,
    waiting: HashMap<String, Vec<oneshot::Sender<Outcome>>>,
    closed: bool,
}

/// Keyed outcome store shared by the pool, its workers, and all waiters.
pub struct ResultStore {
    inner: RwLock<StoreInner>,
    sweeper: CancellationToken,
}

impl ResultStore {
    /// Creates a store and starts its background eviction sweep.
    ///
    /// Must be called from within a tokio runtime. The sweeper holds only a
    /// weak reference and exits when the store is dropped or closed.
    pub fn new(cleanup_interval: Duration) -> Arc<Self> {
        let store = Arc::new(Self {
            inner: RwLock::new(StoreInner {
                values: HashMap::new(),
                waiting: HashMap::new(),
                closed: false,
            }),
            sweeper: CancellationToken::new(),
        });

        Self::spawn_sweeper(Arc::downgrade(&store), cleanup_interval);
        store
    }

    fn spawn_sweeper(store: Weak<ResultStore>, cleanup_interval: Duration) {
        tokio::spawn(async move {
            let token = match store.upgrade() {
                Some(s) => s.sweeper.clone(),
                None => return,
            };
            let mut tick = tokio::time::interval(cleanup_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; skip it.
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        let Some(s) = store.upgrade() else { break };
                        s.sweep(Instant::now());
                    }
                }
            }
        });
    }

    /// Stores a value outcome under `id`, replacing any prior entry and
    /// waking all waiters registered for the id.
    ///
    /// Fails only after [`close`](Self::close).
    pub fn store(&self, id: &str, value: JobValue, ttl: Duration) -> Result<(), StoreClosed> {
        self.store_outcome(id, Outcome::from_value(value, ttl))
    }

    /// Stores an error outcome under `id`.
    pub fn store_error(&self, id: &str, reason: Reason, ttl: Duration) -> Result<(), StoreClosed> {
        self.store_outcome(id, Outcome::from_error(reason, ttl))
    }

    /// Stores an already-built outcome under `id`.
    pub fn store_outcome(&self, id: &str, outcome: Outcome) -> Result<(), StoreClosed> {
        let waiters = {
            let mut inner = self.write();
            if inner.closed {
                return Err(StoreClosed);
            }
            inner.values.insert(id.to_string(), outcome.clone());
            inner.waiting.remove(id).unwrap_or_default()
        };

        if !waiters.is_empty() {
            trace!("store: delivering '{id}' to {} waiter(s)", waiters.len());
        }
        for waiter in waiters {
            // Receiver may be gone; delivery is best-effort by design of the
            // single-shot handle, never blocking.
            let _ = waiter.send(outcome.clone());
        }
        Ok(())
    }

    /// Returns a single-shot handle for `id`.
    ///
    /// Resolved immediately when a live (non-expired) entry exists; otherwise
    /// registers a fresh waiter. Each call returns an independent handle.
    pub fn awaiter(&self, id: &str) -> OutcomeHandle {
        let mut inner = self.write();
        if inner.closed {
            return OutcomeHandle::ready(Outcome::from_error(Reason::Cancelled, Duration::ZERO));
        }
        if let Some(existing) = inner.values.get(id) {
            if !existing.is_expired(Instant::now()) {
                return OutcomeHandle::ready(existing.clone());
            }
        }
        let (tx, rx) = oneshot::channel();
        inner.waiting.entry(id.to_string()).or_default().push(tx);
        OutcomeHandle::pending(rx)
    }

    /// Non-blocking probe: true when a live entry exists for `id`.
    pub fn exists(&self, id: &str) -> bool {
        let inner = self.read();
        inner
            .values
            .get(id)
            .is_some_and(|o| !o.is_expired(Instant::now()))
    }

    /// Shuts the store down.
    ///
    /// Idempotent. Stops the eviction sweep, releases every outstanding
    /// waiter with a [`Reason::Cancelled`] outcome, and makes subsequent
    /// writes fail with [`StoreClosed`].
    pub fn close(&self) {
        self.sweeper.cancel();

        let waiting = {
            let mut inner = self.write();
            if inner.closed {
                return;
            }
            inner.closed = true;
            std::mem::take(&mut inner.waiting)
        };

        let terminal = Outcome::from_error(Reason::Cancelled, Duration::ZERO);
        for (_, waiters) in waiting {
            for waiter in waiters {
                let _ = waiter.send(terminal.clone());
            }
        }
        debug!("result store closed");
    }

    /// Removes entries whose TTL window has elapsed at `now`.
    fn sweep(&self, now: Instant) {
        let mut inner = self.write();
        let before = inner.values.len();
        inner.values.retain(|_, outcome| !outcome.is_expired(now));
        let evicted = before - inner.values.len();
        if evicted > 0 {
            debug!("result store sweep evicted {evicted} entrie(s)");
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ResultStore {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::value;

    fn store_for_test() -> Arc<ResultStore> {
        ResultStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn await_after_store_resolves_immediately() {
        let store = store_for_test();
        store.store("k", value("v"), Duration::ZERO).unwrap();

        let handle = store.awaiter("k");
        assert!(handle.is_ready());
        assert_eq!(handle.recv().await.value_of::<&str>(), Some(&"v"));
    }

    #[tokio::test]
    async fn waiter_registered_before_store_is_delivered() {
        let store = store_for_test();
        let handle = store.awaiter("k");
        assert!(!handle.is_ready());

        store.store("k", value(7u32), Duration::ZERO).unwrap();
        assert_eq!(handle.recv().await.value_of::<u32>(), Some(&7));
    }

    #[tokio::test]
    async fn second_store_wins_but_earlier_waiters_saw_the_first() {
        let store = store_for_test();
        let early = store.awaiter("k");

        store.store("k", value(1u32), Duration::ZERO).unwrap();
        store.store("k", value(2u32), Duration::ZERO).unwrap();

        assert_eq!(early.recv().await.value_of::<u32>(), Some(&1));
        assert_eq!(store.awaiter("k").recv().await.value_of::<u32>(), Some(&2));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_never_stored() {
        let store = ResultStore::new(Duration::from_millis(20));
        store.store("k", value(1u32), Duration::from_millis(10)).unwrap();
        assert!(store.exists("k"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.exists("k"));
        assert!(!store.awaiter("k").is_ready());
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        let store = ResultStore::new(Duration::from_millis(10));
        store.store("k", value(1u32), Duration::ZERO).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.exists("k"));
    }

    #[tokio::test]
    async fn close_releases_waiters_with_cancelled() {
        let store = store_for_test();
        let handle = store.awaiter("never");

        store.close();
        assert_eq!(handle.recv().await.error(), Some(&Reason::Cancelled));

        assert!(store.store("x", value(1u32), Duration::ZERO).is_err());
        assert_eq!(
            store.awaiter("x").recv().await.error(),
            Some(&Reason::Cancelled)
        );
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = store_for_test();
        store.close();
        store.close();
    }
}
