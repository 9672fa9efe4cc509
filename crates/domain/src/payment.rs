//! Payment aggregate.

use std::collections::HashSet;

use common::{TxId, UserId};
use event_store::Version;

use crate::{
    Aggregate, Command, DomainError, Event,
    message::{PaymentAuthorized, PaymentDeclined, SubmitPayment},
};

/// Which payments are approved.
///
/// Configuration supplied at construction; never derived from the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PaymentPolicy {
    /// Every payment is approved.
    #[default]
    ApproveAll,

    /// Payments from the listed users are declined.
    Decline(HashSet<UserId>),
}

impl PaymentPolicy {
    /// Declines payments from the given users.
    pub fn decline(users: impl IntoIterator<Item = UserId>) -> Self {
        PaymentPolicy::Decline(users.into_iter().collect())
    }

    /// Returns true if the user's payment is approved.
    pub fn approves(&self, user_id: UserId) -> bool {
        match self {
            PaymentPolicy::ApproveAll => true,
            PaymentPolicy::Decline(users) => !users.contains(&user_id),
        }
    }
}

/// Event-sourced payment processor.
///
/// Issues a unique, strictly increasing transaction number for every
/// authorized payment.
#[derive(Debug, Clone, Default)]
pub struct Payment {
    version: Version,
    tx_seq: u64,
    policy: PaymentPolicy,
}

impl Payment {
    /// Creates an empty payment processor with the given policy.
    pub fn new(policy: PaymentPolicy) -> Self {
        Self {
            version: Version::initial(),
            tx_seq: 0,
            policy,
        }
    }

    fn submit(&self, command: &SubmitPayment) -> Event {
        if self.policy.approves(command.user_id) {
            PaymentAuthorized {
                correlation_id: command.correlation_id,
                user_id: command.user_id,
                tx_id: TxId::new(self.tx_seq + 1),
            }
            .into()
        } else {
            // Declines do not consume a sequence number
            PaymentDeclined {
                correlation_id: command.correlation_id,
                user_id: command.user_id,
                tx_id: TxId::from(command.product_id),
            }
            .into()
        }
    }

    /// Returns the number of authorized payments.
    pub fn tx_seq(&self) -> u64 {
        self.tx_seq
    }
}

impl Aggregate for Payment {
    fn aggregate_type() -> &'static str {
        "Payment"
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
            Command::SubmitPayment(c) => Ok(self.submit(c)),
            other => Err(DomainError::UnsupportedCommand {
                aggregate_type: Self::aggregate_type(),
                command: other.command_type(),
            }),
        }
    }

    fn apply(&mut self, event: &Event) {
        if let Event::PaymentAuthorized(_) = event {
            self.tx_seq += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use common::{CorrelationId, ProductId};

    use super::*;

    fn submit(user: u64) -> Command {
        SubmitPayment {
            correlation_id: CorrelationId::new(),
            user_id: UserId::new(user),
            product_id: ProductId::new(1337),
        }
        .into()
    }

    fn authorized_tx(event: &Event) -> TxId {
        match event {
            Event::PaymentAuthorized(data) => data.tx_id,
            other => panic!("expected PaymentAuthorized, got {other:?}"),
        }
    }

    #[test]
    fn first_authorization_is_tx_one() {
        let payment = Payment::default();
        let event = payment.decide(&submit(9)).unwrap();
        assert_eq!(authorized_tx(&event), TxId::new(1));
    }

    #[test]
    fn sequence_advances_only_when_applied() {
        let mut payment = Payment::default();

        let first = payment.decide(&submit(9)).unwrap();
        let again = payment.decide(&submit(9)).unwrap();
        assert_eq!(authorized_tx(&first), authorized_tx(&again));

        payment.apply(&first);
        let second = payment.decide(&submit(9)).unwrap();
        assert_eq!(authorized_tx(&second), TxId::new(2));
        assert_eq!(payment.tx_seq(), 1);
    }

    #[test]
    fn declined_payment_echoes_product_and_keeps_sequence() {
        let mut payment = Payment::new(PaymentPolicy::decline([UserId::new(9)]));

        let event = payment.decide(&submit(9)).unwrap();
        let Event::PaymentDeclined(data) = &event else {
            panic!("expected PaymentDeclined, got {event:?}");
        };
        assert_eq!(data.tx_id, TxId::new(1337));

        payment.apply(&event);
        assert_eq!(payment.tx_seq(), 0);

        let approved = payment.decide(&submit(10)).unwrap();
        assert_eq!(authorized_tx(&approved), TxId::new(1));
    }

    #[test]
    fn rejects_inventory_commands() {
        let payment = Payment::default();
        let command = Command::from(crate::message::ReserveProduct {
            correlation_id: CorrelationId::new(),
            user_id: UserId::new(9),
            product_id: ProductId::new(1337),
        });
        assert!(matches!(
            payment.decide(&command),
            Err(DomainError::UnsupportedCommand { aggregate_type: "Payment", .. })
        ));
    }
}
