//! Domain error types.

use common::InstanceId;
use event_store::EventStoreError;
use thiserror::Error;

use crate::reorder::ReorderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A reorder instance rejected the requested transition.
    #[error("Reorder error: {0}")]
    Reorder(#[from] ReorderError),

    /// No instance exists with this ID.
    #[error("Reorder instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
