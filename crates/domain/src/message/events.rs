use common::{CorrelationId, ProductId, TxId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Facts published by the saga's components.
///
/// Inventory and payment events are persisted before they are published.
/// `OrderCompleted` and `OrderFailed` are the saga's terminal notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// Inventory reserved the product.
    ProductReserved(ProductReserved),

    /// Inventory could not reserve the product.
    ProductOutOfStock(ProductOutOfStock),

    /// Payment charged the user.
    PaymentAuthorized(PaymentAuthorized),

    /// Payment refused the charge.
    PaymentDeclined(PaymentDeclined),

    /// Inventory shipped the product.
    ProductShipped(ProductShipped),

    /// The order saga finished successfully.
    OrderCompleted(OrderCompleted),

    /// The order saga finished without shipping.
    OrderFailed(OrderFailed),
}

/// Fieldless mirror of [`Event`] variants, used as the bus routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ProductReserved,
    ProductOutOfStock,
    PaymentAuthorized,
    PaymentDeclined,
    ProductShipped,
    OrderCompleted,
    OrderFailed,
}

impl EventKind {
    /// Every event kind.
    pub const ALL: [EventKind; 7] = [
        EventKind::ProductReserved,
        EventKind::ProductOutOfStock,
        EventKind::PaymentAuthorized,
        EventKind::PaymentDeclined,
        EventKind::ProductShipped,
        EventKind::OrderCompleted,
        EventKind::OrderFailed,
    ];

    /// Kinds that end a saga.
    pub const TERMINAL: [EventKind; 2] = [EventKind::OrderCompleted, EventKind::OrderFailed];

    /// Returns the kind name, identical to the serialized `type` tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProductReserved => "ProductReserved",
            EventKind::ProductOutOfStock => "ProductOutOfStock",
            EventKind::PaymentAuthorized => "PaymentAuthorized",
            EventKind::PaymentDeclined => "PaymentDeclined",
            EventKind::ProductShipped => "ProductShipped",
            EventKind::OrderCompleted => "OrderCompleted",
            EventKind::OrderFailed => "OrderFailed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Event {
    /// Returns the runtime variant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ProductReserved(_) => EventKind::ProductReserved,
            Event::ProductOutOfStock(_) => EventKind::ProductOutOfStock,
            Event::PaymentAuthorized(_) => EventKind::PaymentAuthorized,
            Event::PaymentDeclined(_) => EventKind::PaymentDeclined,
            Event::ProductShipped(_) => EventKind::ProductShipped,
            Event::OrderCompleted(_) => EventKind::OrderCompleted,
            Event::OrderFailed(_) => EventKind::OrderFailed,
        }
    }

    /// Returns the saga this event belongs to.
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Event::ProductReserved(e) => e.correlation_id,
            Event::ProductOutOfStock(e) => e.correlation_id,
            Event::PaymentAuthorized(e) => e.correlation_id,
            Event::PaymentDeclined(e) => e.correlation_id,
            Event::ProductShipped(e) => e.correlation_id,
            Event::OrderCompleted(e) => e.correlation_id,
            Event::OrderFailed(e) => e.correlation_id,
        }
    }

    /// Returns the user the event concerns.
    pub fn user_id(&self) -> UserId {
        match self {
            Event::ProductReserved(e) => e.user_id,
            Event::ProductOutOfStock(e) => e.user_id,
            Event::PaymentAuthorized(e) => e.user_id,
            Event::PaymentDeclined(e) => e.user_id,
            Event::ProductShipped(e) => e.user_id,
            Event::OrderCompleted(e) => e.user_id,
            Event::OrderFailed(e) => e.user_id,
        }
    }

    /// Returns true if the event ends a saga.
    pub fn is_terminal(&self) -> bool {
        EventKind::TERMINAL.contains(&self.kind())
    }
}

impl DomainEvent for Event {
    fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Data for ProductReserved event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductReserved {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,

    /// Echoes the reserved product ID.
    pub tx_id: TxId,
}

/// Data for ProductOutOfStock event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOutOfStock {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,
    pub product_id: ProductId,
}

/// Data for PaymentAuthorized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAuthorized {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,

    /// Payment sequence number, unique across the payment log.
    pub tx_id: TxId,
}

/// Data for PaymentDeclined event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDeclined {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,
    pub tx_id: TxId,
}

/// Data for ProductShipped event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductShipped {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,
    pub tx_id: TxId,
}

/// Data for OrderCompleted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,

    /// Transaction number of the shipment.
    pub tx_id: TxId,
}

/// Data for OrderFailed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFailed {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,
    pub reason: FailureReason,
}

/// Why an order saga failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FailureReason {
    /// Inventory could not reserve the product.
    OutOfStock { product_id: ProductId },

    /// Payment refused the charge.
    PaymentDeclined { tx_id: TxId },

    /// A component rejected or could not persist a command.
    CommandFailed { component: String, message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::OutOfStock { product_id } => {
                write!(f, "product {product_id} is out of stock")
            }
            FailureReason::PaymentDeclined { tx_id } => write!(f, "payment {tx_id} declined"),
            FailureReason::CommandFailed { component, message } => {
                write!(f, "{component} failed: {message}")
            }
        }
    }
}

impl From<ProductReserved> for Event {
    fn from(data: ProductReserved) -> Self {
        Event::ProductReserved(data)
    }
}

impl From<ProductOutOfStock> for Event {
    fn from(data: ProductOutOfStock) -> Self {
        Event::ProductOutOfStock(data)
    }
}

impl From<PaymentAuthorized> for Event {
    fn from(data: PaymentAuthorized) -> Self {
        Event::PaymentAuthorized(data)
    }
}

impl From<PaymentDeclined> for Event {
    fn from(data: PaymentDeclined) -> Self {
        Event::PaymentDeclined(data)
    }
}

impl From<ProductShipped> for Event {
    fn from(data: ProductShipped) -> Self {
        Event::ProductShipped(data)
    }
}

impl From<OrderCompleted> for Event {
    fn from(data: OrderCompleted) -> Self {
        Event::OrderCompleted(data)
    }
}

impl From<OrderFailed> for Event {
    fn from(data: OrderFailed) -> Self {
        Event::OrderFailed(data)
    }
}
