//! Order fulfillment saga constants.

use domain::EventKind;

/// Persistence ID of the inventory log.
pub const INVENTORY_ID: &str = "inventory";

/// Persistence ID of the payment log.
pub const PAYMENT_ID: &str = "payment";

/// Events the process manager reacts to.
pub const SAGA_INPUTS: [EventKind; 5] = [
    EventKind::ProductReserved,
    EventKind::ProductOutOfStock,
    EventKind::PaymentAuthorized,
    EventKind::PaymentDeclined,
    EventKind::ProductShipped,
];
