//! Commands and events exchanged between the saga's components.
//!
//! Both are closed tagged unions: every handler dispatches with a single
//! `match`, and an event's variant is its bus routing key ([`EventKind`]).

mod commands;
mod events;

pub use commands::{Command, CreateOrder, ReserveProduct, ShipProduct, SubmitPayment};
pub use events::{
    Event, EventKind, FailureReason, OrderCompleted, OrderFailed, PaymentAuthorized,
    PaymentDeclined, ProductOutOfStock, ProductReserved, ProductShipped,
};
