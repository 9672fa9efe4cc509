use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventId, EventStoreError, Result, Version};

/// Write precondition for [`EventStore::append`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Version the log must be at before the write. `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Appends wherever the log currently ends.
    pub fn unchecked() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Requires an empty log.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// Append-only, per-aggregate event log with a transactional outbox.
///
/// `append` is the durability boundary: an event has happened only once it
/// returns `Ok`. Every appended event is also recorded as pending publication
/// in the same write, and stays pending until [`acknowledge`](Self::acknowledge)d.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a contiguous batch to one log and records it in the outbox.
    ///
    /// Returns the version of the last appended event.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Loads every event of an aggregate in version order (oldest first).
    ///
    /// Repeated calls return the same sequence.
    async fn load(&self, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Returns None for an empty log.
    async fn aggregate_version(&self, aggregate_id: &AggregateId) -> Result<Option<Version>>;

    /// Returns the events of an aggregate that are appended but not yet
    /// acknowledged as published, in version order.
    async fn pending_outbox(&self, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Marks events as published, removing them from the outbox.
    ///
    /// Unknown IDs are ignored.
    async fn acknowledge(&self, event_ids: &[EventId]) -> Result<()>;
}

/// Checks that a batch is non-empty, targets a single log and has
/// contiguous versions.
pub(crate) fn check_batch(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend("empty batch".to_string()));
    };

    for (offset, event) in events.iter().enumerate() {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch mixes log {} with {}",
                first.aggregate_id, event.aggregate_id
            )));
        }
        let expected = Version::new(first.version.as_i64() + offset as i64);
        if event.version != expected {
            return Err(EventStoreError::InvalidAppend(format!(
                "expected {expected} at batch position {offset}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}
