//! Inventory aggregate.

use std::collections::HashSet;

use common::{ProductId, TxId};
use event_store::Version;

use crate::{
    Aggregate, Command, DomainError, Event,
    message::{ProductOutOfStock, ProductReserved, ProductShipped, ReserveProduct, ShipProduct},
};

/// Which products can be reserved.
///
/// Configuration supplied at construction; never derived from the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StockPolicy {
    /// Every product is always in stock.
    #[default]
    Unlimited,

    /// The listed products are out of stock, everything else is available.
    Unavailable(HashSet<ProductId>),
}

impl StockPolicy {
    /// Marks the given products as out of stock.
    pub fn unavailable(products: impl IntoIterator<Item = ProductId>) -> Self {
        StockPolicy::Unavailable(products.into_iter().collect())
    }

    /// Returns true if the product can be reserved.
    pub fn is_available(&self, product_id: ProductId) -> bool {
        match self {
            StockPolicy::Unlimited => true,
            StockPolicy::Unavailable(products) => !products.contains(&product_id),
        }
    }
}

/// Event-sourced inventory.
///
/// Handles `ReserveProduct` and `ShipProduct`. Its only persisted state is
/// the number of shipped products.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    version: Version,
    shipped_count: u64,
    policy: StockPolicy,
}

impl Inventory {
    /// Creates an empty inventory with the given stock policy.
    pub fn new(policy: StockPolicy) -> Self {
        Self {
            version: Version::initial(),
            shipped_count: 0,
            policy,
        }
    }
}

// Command methods (return events)
impl Inventory {
    fn reserve(&self, command: &ReserveProduct) -> Event {
        if self.policy.is_available(command.product_id) {
            ProductReserved {
                correlation_id: command.correlation_id,
                user_id: command.user_id,
                tx_id: TxId::from(command.product_id),
            }
            .into()
        } else {
            ProductOutOfStock {
                correlation_id: command.correlation_id,
                user_id: command.user_id,
                product_id: command.product_id,
            }
            .into()
        }
    }

    fn ship(&self, command: &ShipProduct) -> Event {
        ProductShipped {
            correlation_id: command.correlation_id,
            user_id: command.user_id,
            tx_id: command.tx_id,
        }
        .into()
    }
}

// Query methods
impl Inventory {
    /// Returns the number of products shipped so far.
    pub fn shipped_count(&self) -> u64 {
        self.shipped_count
    }
}

impl Aggregate for Inventory {
    fn aggregate_type() -> &'static str {
        "Inventory"
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn decide(&self, command: &Command) -> Result<Event, DomainError> {
        command.validate()?;

        match command {
            Command::ReserveProduct(c) => Ok(self.reserve(c)),
            Command::ShipProduct(c) => Ok(self.ship(c)),
            other => Err(DomainError::UnsupportedCommand {
                aggregate_type: Self::aggregate_type(),
                command: other.command_type(),
            }),
        }
    }

    fn apply(&mut self, event: &Event) {
        if let Event::ProductShipped(_) = event {
            self.shipped_count += 1;
        }
    }
}
