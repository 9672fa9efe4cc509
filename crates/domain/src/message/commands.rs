use common::{CorrelationId, ProductId, TxId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Instructions directed at one component.
///
/// Commands are transient: they are never persisted, only the events they
/// produce are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Command {
    /// Start a new order saga. Handled by the process manager.
    CreateOrder(CreateOrder),

    /// Reserve a product for an order. Handled by inventory.
    ReserveProduct(ReserveProduct),

    /// Charge the user for an order. Handled by payment.
    SubmitPayment(SubmitPayment),

    /// Ship a reserved and paid product. Handled by inventory.
    ShipProduct(ShipProduct),
}

impl Command {
    /// Returns the command type name.
    pub fn command_type(&self) -> &'static str {
        match self {
            Command::CreateOrder(_) => "CreateOrder",
            Command::ReserveProduct(_) => "ReserveProduct",
            Command::SubmitPayment(_) => "SubmitPayment",
            Command::ShipProduct(_) => "ShipProduct",
        }
    }

    /// Returns the saga this command belongs to.
    ///
    /// `CreateOrder` has none yet: its correlation ID is minted on receipt.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Command::CreateOrder(_) => None,
            Command::ReserveProduct(c) => Some(c.correlation_id),
            Command::SubmitPayment(c) => Some(c.correlation_id),
            Command::ShipProduct(c) => Some(c.correlation_id),
        }
    }

    /// Returns the user the command acts for.
    pub fn user_id(&self) -> UserId {
        match self {
            Command::CreateOrder(c) => c.user_id,
            Command::ReserveProduct(c) => c.user_id,
            Command::SubmitPayment(c) => c.user_id,
            Command::ShipProduct(c) => c.user_id,
        }
    }

    /// Checks that every required field is present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let user_id = self.user_id();
        if user_id.is_unset() {
            return Err(ValidationError::MissingUserId);
        }

        match self {
            Command::CreateOrder(CreateOrder { product_id, .. })
            | Command::ReserveProduct(ReserveProduct { product_id, .. })
            | Command::SubmitPayment(SubmitPayment { product_id, .. })
                if product_id.is_unset() =>
            {
                Err(ValidationError::MissingProductId)
            }
            Command::ShipProduct(ShipProduct { tx_id, .. }) if tx_id.is_unset() => {
                Err(ValidationError::MissingTxId)
            }
            _ => Ok(()),
        }
    }
}

/// Data for the CreateOrder command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    /// The user placing the order.
    pub user_id: UserId,

    /// The product being ordered.
    pub product_id: ProductId,
}

impl CreateOrder {
    /// Creates a new CreateOrder command.
    pub fn new(user_id: impl Into<UserId>, product_id: impl Into<ProductId>) -> Self {
        Self {
            user_id: user_id.into(),
            product_id: product_id.into(),
        }
    }
}

/// Data for the ReserveProduct command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveProduct {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,
    pub product_id: ProductId,
}

/// Data for the SubmitPayment command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPayment {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,
    pub product_id: ProductId,
}

/// Data for the ShipProduct command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipProduct {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,

    /// Transaction number of the reservation being shipped.
    pub tx_id: TxId,
}

impl From<CreateOrder> for Command {
    fn from(data: CreateOrder) -> Self {
        Command::CreateOrder(data)
    }
}

impl From<ReserveProduct> for Command {
    fn from(data: ReserveProduct) -> Self {
        Command::ReserveProduct(data)
    }
}

impl From<SubmitPayment> for Command {
    fn from(data: SubmitPayment) -> Self {
        Command::SubmitPayment(data)
    }
}

impl From<ShipProduct> for Command {
    fn from(data: ShipProduct) -> Self {
        Command::ShipProduct(data)
    }
}
