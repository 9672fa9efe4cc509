//! Identifier types shared across the order-fulfillment workspace.

mod types;

pub use types::{AggregateId, CorrelationId, ProductId, TxId, UserId};
