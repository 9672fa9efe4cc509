use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, check_batch},
};

#[derive(Debug, Default)]
struct Log {
    events: Vec<EventEnvelope>,
    outbox: HashSet<EventId>,
    failing_appends: u32,
    unreported_appends: u32,
    failing_acks: u32,
}

impl Log {
    fn current_version(&self, aggregate_id: &AggregateId) -> Version {
        self.events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial())
    }
}

/// In-memory event store for tests and the demo binary.
///
/// Events and outbox entries live behind one lock so an append records both
/// or neither. Failures can be injected to exercise persistence error paths.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }

    /// Returns the number of events awaiting publication across all aggregates.
    pub async fn outbox_len(&self) -> usize {
        self.log.read().await.outbox.len()
    }

    /// Makes the next `count` appends fail with `Unavailable`.
    pub async fn fail_next_appends(&self, count: u32) {
        self.log.write().await.failing_appends = count;
    }

    /// Makes the next `count` appends commit but still report `Unavailable`,
    /// as when the connection drops after the transaction commits.
    pub async fn unreport_next_appends(&self, count: u32) {
        self.log.write().await.unreported_appends = count;
    }

    /// Makes the next `count` acknowledgements fail with `Unavailable`.
    pub async fn fail_next_acknowledgements(&self, count: u32) {
        self.log.write().await.failing_acks = count;
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        check_batch(&events)?;

        let mut log = self.log.write().await;

        if log.failing_appends > 0 {
            log.failing_appends -= 1;
            return Err(EventStoreError::Unavailable(
                "injected append failure".to_string(),
            ));
        }

        let aggregate_id = events[0].aggregate_id.clone();
        let current_version = log.current_version(&aggregate_id);

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }

        // Unique (aggregate_id, version) constraint
        if events[0].version != current_version.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(current_version);
        for event in events {
            log.outbox.insert(event.event_id);
            log.events.push(event);
        }

        if log.unreported_appends > 0 {
            log.unreported_appends -= 1;
            return Err(EventStoreError::Unavailable(
                "injected failure after commit".to_string(),
            ));
        }

        Ok(last_version)
    }

    async fn load(&self, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let mut events: Vec<_> = log
            .events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn aggregate_version(&self, aggregate_id: &AggregateId) -> Result<Option<Version>> {
        let log = self.log.read().await;
        let version = log
            .events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max();
        Ok(version)
    }

    async fn pending_outbox(&self, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let mut pending: Vec<_> = log
            .events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id && log.outbox.contains(&e.event_id))
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.version);
        Ok(pending)
    }

    async fn acknowledge(&self, event_ids: &[EventId]) -> Result<()> {
        let mut log = self.log.write().await;

        if log.failing_acks > 0 {
            log.failing_acks -= 1;
            return Err(EventStoreError::Unavailable(
                "injected acknowledgement failure".to_string(),
            ));
        }

        for id in event_ids {
            log.outbox.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_event(aggregate: &str, version: Version, event_type: &str) -> EventEnvelope {
        EventEnvelope::record(AggregateId::new(aggregate), "TestAggregate", version)
            .payload_raw(event_type, serde_json::json!({"test": true}))
    }

    #[tokio::test]
    async fn append_single_event() {
        let store = InMemoryEventStore::new();
        let event = create_test_event("inventory", Version::first(), "TestEvent");

        let version = store
            .append(vec![event], AppendOptions::expect_new())
            .await
            .unwrap();
        assert_eq!(version, Version::first());

        let events = store.load(&AggregateId::new("inventory")).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn load_is_scoped_and_ordered() {
        let store = InMemoryEventStore::new();
        store
            .append(
                vec![
                    create_test_event("inventory", Version::new(1), "Event1"),
                    create_test_event("inventory", Version::new(2), "Event2"),
                ],
                AppendOptions::unchecked(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("payment", Version::new(1), "Other")],
                AppendOptions::unchecked(),
            )
            .await
            .unwrap();

        let first = store.load(&AggregateId::new("inventory")).await.unwrap();
        let second = store.load(&AggregateId::new("inventory")).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].event_type, "Event1");
        assert_eq!(first[1].event_type, "Event2");
        let ids: Vec<_> = second.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, first.iter().map(|e| e.event_id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_conflict_on_wrong_version() {
        let store = InMemoryEventStore::new();
        store
            .append(
                vec![create_test_event("inventory", Version::first(), "Event1")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        let result = store
            .append(
                vec![create_test_event("inventory", Version::new(2), "Event2")],
                AppendOptions::expect_version(Version::initial()),
            )
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_version_is_rejected_without_expectation() {
        let store = InMemoryEventStore::new();
        store
            .append(
                vec![create_test_event("inventory", Version::first(), "Event1")],
                AppendOptions::unchecked(),
            )
            .await
            .unwrap();

        let result = store
            .append(
                vec![create_test_event("inventory", Version::first(), "Again")],
                AppendOptions::unchecked(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn append_records_outbox_until_acknowledged() {
        let store = InMemoryEventStore::new();
        let inventory = AggregateId::new("inventory");
        let event = create_test_event("inventory", Version::first(), "TestEvent");
        let event_id = event.event_id;

        store
            .append(vec![event], AppendOptions::expect_new())
            .await
            .unwrap();

        let pending = store.pending_outbox(&inventory).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_id, event_id);

        store.acknowledge(&[event_id]).await.unwrap();
        assert!(store.pending_outbox(&inventory).await.unwrap().is_empty());
        assert_eq!(store.outbox_len().await, 0);
        // The log itself is untouched by acknowledgement
        assert_eq!(store.load(&inventory).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_append_failure_writes_nothing() {
        let store = InMemoryEventStore::new();
        store.fail_next_appends(1).await;

        let result = store
            .append(
                vec![create_test_event("inventory", Version::first(), "TestEvent")],
                AppendOptions::expect_new(),
            )
            .await;
        assert!(matches!(result, Err(EventStoreError::Unavailable(_))));
        assert_eq!(store.event_count().await, 0);
        assert_eq!(store.outbox_len().await, 0);

        // Only the requested number of appends fail
        store
            .append(
                vec![create_test_event("inventory", Version::first(), "TestEvent")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn unreported_append_is_still_committed() {
        let store = InMemoryEventStore::new();
        let inventory = AggregateId::new("inventory");
        store.unreport_next_appends(1).await;

        let result = store
            .append(
                vec![create_test_event("inventory", Version::first(), "TestEvent")],
                AppendOptions::expect_new(),
            )
            .await;
        assert!(matches!(result, Err(EventStoreError::Unavailable(_))));
        assert_eq!(
            store.aggregate_version(&inventory).await.unwrap(),
            Some(Version::first())
        );
        assert_eq!(store.pending_outbox(&inventory).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_ack_failure_keeps_entry_pending() {
        let store = InMemoryEventStore::new();
        let event = create_test_event("payment", Version::first(), "TestEvent");
        let event_id = event.event_id;
        store
            .append(vec![event], AppendOptions::expect_new())
            .await
            .unwrap();

        store.fail_next_acknowledgements(1).await;
        assert!(store.acknowledge(&[event_id]).await.is_err());
        assert_eq!(store.outbox_len().await, 1);

        store.acknowledge(&[event_id]).await.unwrap();
        assert_eq!(store.outbox_len().await, 0);
    }

    #[tokio::test]
    async fn aggregate_version_tracks_latest() {
        let store = InMemoryEventStore::new();
        let inventory = AggregateId::new("inventory");
        assert!(store.aggregate_version(&inventory).await.unwrap().is_none());

        store
            .append(
                vec![
                    create_test_event("inventory", Version::new(1), "Event1"),
                    create_test_event("inventory", Version::new(2), "Event2"),
                ],
                AppendOptions::unchecked(),
            )
            .await
            .unwrap();

        assert_eq!(
            store.aggregate_version(&inventory).await.unwrap(),
            Some(Version::new(2))
        );
    }
}
