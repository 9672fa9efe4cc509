//! Event bus for the order-fulfillment saga.
//!
//! Routes each published [`Event`](domain::Event) to every subscriber that
//! registered interest in its runtime variant.

mod bus;

pub use bus::EventBus;
