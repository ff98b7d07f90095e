//! # Control-plane events and the broadcast bus.
//!
//! Lifecycle observation is message-passing, not callbacks: the pool
//! publishes [`Event`]s onto a [`Bus`] and consumers pull them from a
//! subscription. This keeps the ownership tree acyclic and avoids
//! re-entrancy into the structures the events describe.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
