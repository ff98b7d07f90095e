//! Event bus for broadcasting pool lifecycle events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] through which
//! the dispatcher, workers, and the scaler publish [`Event`]s.
//!
//! - [`Bus::publish`] sends an event to all subscribers (non-blocking).
//! - [`Bus::subscribe`] creates a new receiver for consuming events.
//!
//! Subscribers that fall behind lose the oldest events (broadcast lagging
//! semantics); the fabric never blocks on a slow consumer.

use tokio::sync::broadcast;

use crate::events::Event;

/// Broadcast channel for pool events.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Errors are ignored if there are no active subscribers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Subscribes to the bus and returns a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
