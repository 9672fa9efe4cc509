//! Domain layer for the order-fulfillment saga.
//!
//! This crate provides:
//! - The message model: [`Command`] and [`Event`] tagged unions
//! - The [`Aggregate`] trait with pure decide/apply and log replay
//! - The [`Inventory`] and [`Payment`] aggregates

pub mod aggregate;
pub mod error;
pub mod inventory;
pub mod message;
pub mod payment;

pub use aggregate::{Aggregate, DomainEvent};
pub use error::{DomainError, ReplayError, ValidationError};
pub use inventory::{Inventory, StockPolicy};
pub use message::{
    Command, CreateOrder, Event, EventKind, FailureReason, OrderCompleted, OrderFailed,
    PaymentAuthorized, PaymentDeclined, ProductOutOfStock, ProductReserved, ProductShipped,
    ReserveProduct, ShipProduct, SubmitPayment,
};
pub use payment::{Payment, PaymentPolicy};
