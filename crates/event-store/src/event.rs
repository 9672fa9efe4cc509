use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::AggregateId;

/// Identifies one appended event. Also keys its outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Position in an aggregate's log.
///
/// An empty log is at 0; the n-th appended event carries version n, so a
/// log of length n ends at version n with no gaps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Position of an empty log.
    pub const fn initial() -> Self {
        Self(0)
    }

    /// Position of the first appended event.
    pub const fn first() -> Self {
        Self(1)
    }

    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns true if no event has been appended at or before this position.
    pub const fn is_initial(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// An event as stored in its aggregate's log.
///
/// The payload is the serialized domain event; the remaining fields place
/// it in the log and tie it to the saga that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    /// Kind of aggregate owning the log, checked on replay.
    pub aggregate_type: String,
    pub version: Version,
    /// Variant name of the payload, e.g. `ProductReserved`.
    pub event_type: String,
    pub correlation_id: Option<CorrelationId>,
    pub recorded_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Starts an envelope for position `version` of the log `aggregate_id`.
    pub fn record(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
    ) -> EnvelopeBuilder {
        EnvelopeBuilder {
            event_id: EventId::new(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            correlation_id: None,
            recorded_at: None,
        }
    }

    /// Deserializes the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// Log position of an envelope under construction. Finished by
/// [`payload`](Self::payload) or [`payload_raw`](Self::payload_raw).
#[derive(Debug)]
pub struct EnvelopeBuilder {
    event_id: EventId,
    aggregate_id: AggregateId,
    aggregate_type: String,
    version: Version,
    correlation_id: Option<CorrelationId>,
    recorded_at: Option<DateTime<Utc>>,
}

impl EnvelopeBuilder {
    pub fn event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Defaults to the time the envelope is finished.
    pub fn recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }

    /// Serializes `event` as the payload.
    pub fn payload<T: Serialize>(
        self,
        event_type: impl Into<String>,
        event: &T,
    ) -> Result<EventEnvelope, serde_json::Error> {
        let payload = serde_json::to_value(event)?;
        Ok(self.payload_raw(event_type, payload))
    }

    /// Uses already serialized JSON as the payload.
    pub fn payload_raw(self, event_type: impl Into<String>, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            version: self.version,
            event_type: event_type.into(),
            correlation_id: self.correlation_id,
            recorded_at: self.recorded_at.unwrap_or_else(Utc::now),
            payload,
        }
    }
}
