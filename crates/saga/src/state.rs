//! Saga phase machine.

use serde::{Deserialize, Serialize};

/// The phase of an order saga.
///
/// Phase transitions:
/// ```text
/// AwaitingReservation ──► AwaitingPayment ──► AwaitingShipment ──► Completed
///          │                     │
///          └─────────────────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaPhase {
    /// ReserveProduct sent to inventory.
    #[default]
    AwaitingReservation,

    /// SubmitPayment sent to payment.
    AwaitingPayment,

    /// ShipProduct sent to inventory.
    AwaitingShipment,

    /// Product shipped (terminal state).
    Completed,

    /// Out of stock, declined, or a step could not be executed (terminal state).
    Failed,
}

impl SagaPhase {
    /// Returns true if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaPhase::Completed | SagaPhase::Failed)
    }

    /// Returns the phase name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaPhase::AwaitingReservation => "AwaitingReservation",
            SagaPhase::AwaitingPayment => "AwaitingPayment",
            SagaPhase::AwaitingShipment => "AwaitingShipment",
            SagaPhase::Completed => "Completed",
            SagaPhase::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
