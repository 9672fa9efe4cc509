//! Saga error types.

use std::time::Duration;

use common::AggregateId;
use domain::{DomainError, ValidationError};
use event_store::EventStoreError;
use thiserror::Error;

use crate::directory::ComponentId;

/// Errors that can occur while running the order saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The command is missing a required field.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The aggregate rejected the command.
    #[error("Domain error: {0}")]
    Domain(DomainError),

    /// The event could not be appended; the aggregate state is unchanged.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[source] EventStoreError),

    /// The aggregate could not rebuild its state and refuses all work.
    #[error("Replay failure for {aggregate_id}: {reason}")]
    ReplayFailure {
        aggregate_id: AggregateId,
        reason: String,
    },

    /// No outcome arrived before the deadline. The saga itself keeps running.
    #[error("Timed out after {0:?} waiting for the order outcome")]
    Timeout(Duration),

    /// The component's task is no longer running.
    #[error("Component stopped: {0}")]
    ComponentStopped(String),

    /// No command sink is registered for the component.
    #[error("No route to {0}")]
    NoRoute(ComponentId),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if resubmitting the same command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SagaError::PersistenceFailure(_))
    }
}

impl From<DomainError> for SagaError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::Validation(e) => SagaError::Validation(e),
            other => SagaError::Domain(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
