use thiserror::Error;

use crate::{AggregateId, Version};

/// Reasons an event store operation can fail.
///
/// Every variant means nothing was written: appends are all-or-nothing.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The log moved on since the writer last read it.
    #[error("log {aggregate_id} is at {actual}, writer expected {expected}")]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// Empty batch, mixed logs or non-contiguous versions.
    #[error("rejected append: {0}")]
    InvalidAppend(String),

    #[error("event store unavailable: {0}")]
    Unavailable(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema migration: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("payload encoding: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EventStoreError>;
