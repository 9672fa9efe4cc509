//! Domain error types.

use event_store::Version;
use thiserror::Error;

/// A command is missing a required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("User ID is required")]
    MissingUserId,

    #[error("Product ID is required")]
    MissingProductId,

    #[error("Transaction ID is required")]
    MissingTxId,
}

/// Errors that can occur when an aggregate decides on a command.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The command failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The aggregate does not handle this command.
    #[error("{aggregate_type} does not handle {command}")]
    UnsupportedCommand {
        aggregate_type: &'static str,
        command: &'static str,
    },
}

/// Errors that can occur while rebuilding an aggregate from its log.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The log skips or repeats a version.
    #[error("Version gap: expected {expected}, found {found}")]
    VersionGap { expected: Version, found: Version },

    /// The log contains an event written by a different aggregate type.
    #[error("Foreign event: expected aggregate type {expected}, found {found}")]
    ForeignAggregate {
        expected: &'static str,
        found: String,
    },

    /// An event payload could not be decoded.
    #[error("Undecodable event at version {version}: {source}")]
    Undecodable {
        version: Version,
        #[source]
        source: serde_json::Error,
    },
}
