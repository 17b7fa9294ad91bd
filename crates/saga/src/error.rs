//! Saga error types.

use common::InstanceId;
use domain::{DomainError, ReorderError, ReorderState, Step};
use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur while accepting, running or querying reorder
/// instances.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request failed structural validation.
    #[error("Invalid reorder request: {0}")]
    InvalidRequest(ReorderError),

    /// No instance exists with this ID.
    #[error("Reorder instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// A fatal step exhausted its retries; the instance is `Failed`.
    #[error("Reorder instance {instance_id} failed at step '{step}': {reason}")]
    StepFailed {
        instance_id: InstanceId,
        step: Step,
        reason: String,
    },

    /// The idempotency key was already used for a different request.
    #[error("Idempotency key '{key}' was already used for a different request")]
    IdempotencyConflict { key: String },

    /// Cancellation is only possible before order placement starts.
    #[error("Reorder instance {instance_id} cannot be cancelled in {state} state")]
    CancellationRefused {
        instance_id: InstanceId,
        state: ReorderState,
    },

    /// The dispatch queue is closed; the engine is shutting down.
    #[error("Dispatcher is not accepting work")]
    DispatcherClosed,

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Event store error.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
