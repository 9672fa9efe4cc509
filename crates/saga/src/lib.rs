//! Event-sourced order fulfillment saga.
//!
//! A [`ProcessManagerRef`] orchestrates each order by reacting to events
//! published on the [`EventBus`](event_bus::EventBus):
//! 1. Reserve the product (inventory)
//! 2. Authorize payment (payment)
//! 3. Ship the product (inventory)
//!
//! Out-of-stock and declined payments end the saga with `OrderFailed`.
//! Inventory and payment run as [`AggregateRef`] actors that persist every
//! event before publishing it and rebuild their state from the log on start.

pub mod actor;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod order_fulfillment;
pub mod process_manager;
pub mod state;
pub mod system;

pub use actor::AggregateRef;
pub use client::{OrderClient, OrderOutcome, OutcomeWatcher};
pub use config::SagaConfig;
pub use directory::{CommandReply, CommandSink, ComponentId, Directory};
pub use error::{Result, SagaError};
pub use process_manager::{PendingOrder, ProcessManagerRef, Reaction, SagaInstance, SagaStatus};
pub use state::SagaPhase;
pub use system::{SagaSystem, SagaSystemBuilder};
