//! Reorder instance aggregate and related types.

mod aggregate;
mod events;
mod service;
mod state;
mod step;
mod value_objects;

pub use aggregate::{REORDER_STREAM_TYPE, ReorderInstance};
pub use events::{
    CancellationRequestedData, InstanceCreatedData, InstanceFinishedData, ReorderEvent,
    StepAttemptFailedData, StepRecordedData, StepStartedData,
};
pub use service::{IDEMPOTENCY_METADATA_KEY, ReorderService};
pub use state::ReorderState;
pub use step::{Availability, PlacedOrder, Step, StepOutcome, StepOutput, StepResult};
pub use value_objects::{ProductId, ReorderRequest, StoreId, SupplierId};

use thiserror::Error;

/// Errors raised when a reorder request or transition is not allowed.
#[derive(Debug, Error, PartialEq)]
pub enum ReorderError {
    /// A required identifier was empty.
    #[error("{field} must not be empty")]
    EmptyIdentifier { field: &'static str },

    /// Requested quantity must be positive.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Predicted demand must be a finite, non-negative number.
    #[error("Invalid predicted demand: {value}")]
    InvalidPredictedDemand { value: f64 },

    /// The instance has already been created.
    #[error("Reorder instance already created")]
    AlreadyCreated,

    /// The instance has not been created yet.
    #[error("Reorder instance not created")]
    NotCreated,

    /// The instance already reached a terminal state.
    #[error("Reorder instance already finished in {state} state")]
    AlreadyTerminal { state: ReorderState },

    /// The transition would move the state machine backwards or skip ahead.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: ReorderState,
        action: &'static str,
    },

    /// The step already has a recorded outcome and must not run again.
    #[error("Step {step} already recorded")]
    StepAlreadyRecorded { step: Step },

    /// An earlier step has no recorded outcome yet.
    #[error("Step {step} cannot start before {missing} is recorded")]
    StepOutOfOrder { step: Step, missing: Step },

    /// Cancellation is only possible before order placement starts.
    #[error("Cannot cancel reorder instance in {state} state")]
    CancellationNotAllowed { state: ReorderState },
}
