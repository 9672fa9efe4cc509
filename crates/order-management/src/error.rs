//! Application error types.

use event_store::EventStoreError;
use saga::SagaError;
use thiserror::Error;

/// Errors that stop the application.
#[derive(Debug, Error)]
pub enum AppError {
    /// The log subscriber could not be installed.
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),

    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    /// The event store could not be reached or migrated.
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// The order could not be placed or did not finish in time.
    #[error("saga error: {0}")]
    Saga(#[from] SagaError),
}

/// Result type for application operations.
pub type Result<T> = std::result::Result<T, AppError>;
