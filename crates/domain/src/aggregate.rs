//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::{EventEnvelope, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::{Command, DomainError, Event, ReplayError};

/// A fact that can be stored in an aggregate's log.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Variant name recorded as the envelope's `event_type`.
    fn event_type(&self) -> &'static str;
}

/// Trait for event-sourced aggregates.
///
/// An aggregate turns commands into events with [`decide`](Self::decide) and
/// folds events into state with [`apply`](Self::apply). Both are pure: the
/// actor hosting the aggregate owns persistence and publication.
///
/// `apply` is the only state transition, shared by the live path and replay,
/// so a counter after N events equals the counter rebuilt from those N events.
pub trait Aggregate: Clone + Send + Sync + 'static {
    /// Returns the aggregate type name recorded on every envelope.
    fn aggregate_type() -> &'static str;

    /// Returns the version of the last applied event.
    fn version(&self) -> Version;

    /// Sets the aggregate version.
    fn set_version(&mut self, version: Version);

    /// Decides which event a command produces, without changing state.
    fn decide(&self, command: &Command) -> Result<Event, DomainError>;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// Must be deterministic and must not fail: events are facts.
    fn apply(&mut self, event: &Event);

    /// Applies multiple events in sequence.
    fn apply_events<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Rebuilds state from a log, checking that it is gap-free, written by
    /// this aggregate type and decodable.
    ///
    /// On error the aggregate is left partially replayed and must not be used.
    fn replay(&mut self, envelopes: &[EventEnvelope]) -> Result<(), ReplayError> {
        for envelope in envelopes {
            let expected = self.version().next();
            if envelope.version != expected {
                return Err(ReplayError::VersionGap {
                    expected,
                    found: envelope.version,
                });
            }
            if envelope.aggregate_type != Self::aggregate_type() {
                return Err(ReplayError::ForeignAggregate {
                    expected: Self::aggregate_type(),
                    found: envelope.aggregate_type.clone(),
                });
            }

            let event: Event = envelope.decode().map_err(|source| ReplayError::Undecodable {
                version: envelope.version,
                source,
            })?;
            self.apply(&event);
            self.set_version(envelope.version);
        }
        Ok(())
    }

    /// Wraps an event decided by this aggregate into the envelope that will
    /// be appended at `version`.
    fn envelope_for(
        aggregate_id: &AggregateId,
        version: Version,
        event: &Event,
    ) -> Result<EventEnvelope, serde_json::Error> {
        EventEnvelope::record(aggregate_id.clone(), Self::aggregate_type(), version)
            .correlation_id(event.correlation_id())
            .payload(event.event_type(), event)
    }
}

#[cfg(test)]
mod tests {
    use common::{CorrelationId, TxId, UserId};

    use super::*;
    use crate::{Inventory, message::ProductShipped};

    fn shipped(tx_id: u64) -> Event {
        ProductShipped {
            correlation_id: CorrelationId::new(),
            user_id: UserId::new(9),
            tx_id: TxId::new(tx_id),
        }
        .into()
    }

    fn log(events: &[Event]) -> Vec<EventEnvelope> {
        let inventory = AggregateId::new("inventory");
        events
            .iter()
            .enumerate()
            .map(|(i, e)| Inventory::envelope_for(&inventory, Version::new(i as i64 + 1), e).unwrap())
            .collect()
    }

    #[test]
    fn envelope_records_type_and_correlation() {
        let event = shipped(1);
        let envelope =
            Inventory::envelope_for(&AggregateId::new("inventory"), Version::first(), &event)
                .unwrap();

        assert_eq!(envelope.aggregate_type, "Inventory");
        assert_eq!(envelope.event_type, "ProductShipped");
        assert_eq!(envelope.correlation_id, Some(event.correlation_id()));
        assert_eq!(envelope.decode::<Event>().unwrap(), event);
    }

    #[test]
    fn replay_applies_events_and_tracks_version() {
        let mut inventory = Inventory::default();
        inventory
            .replay(&log(&[shipped(1), shipped(2), shipped(3)]))
            .unwrap();

        assert_eq!(inventory.shipped_count(), 3);
        assert_eq!(inventory.version(), Version::new(3));
    }

    #[test]
    fn replay_rejects_version_gap() {
        let mut envelopes = log(&[shipped(1), shipped(2)]);
        envelopes.remove(0);

        let result = Inventory::default().replay(&envelopes);
        assert!(matches!(result, Err(ReplayError::VersionGap { .. })));
    }

    #[test]
    fn replay_rejects_foreign_aggregate_type() {
        let mut envelopes = log(&[shipped(1)]);
        envelopes[0].aggregate_type = "Payment".to_string();

        let result = Inventory::default().replay(&envelopes);
        assert!(matches!(result, Err(ReplayError::ForeignAggregate { .. })));
    }

    #[test]
    fn replay_rejects_undecodable_payload() {
        let mut envelopes = log(&[shipped(1)]);
        envelopes[0].payload = serde_json::json!({"type": "Unknown"});

        let result = Inventory::default().replay(&envelopes);
        assert!(matches!(result, Err(ReplayError::Undecodable { .. })));
    }
}
