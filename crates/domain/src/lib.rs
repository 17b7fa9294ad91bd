//! Domain layer for the reorder engine.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for event-sourced entities
//! - CommandHandler for load / decide / append cycles
//! - The reorder domain: request value objects, the instance state machine,
//!   step results, events, and the `ReorderInstance` aggregate

pub mod aggregate;
pub mod command;
pub mod error;
pub mod reorder;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{CommandHandler, CommandResult};
pub use error::DomainError;
pub use reorder::{
    Availability, PlacedOrder, ProductId, ReorderError, ReorderEvent, ReorderInstance,
    ReorderRequest, ReorderService, ReorderState, Step, StepOutcome, StepOutput, StepResult,
    StoreId, SupplierId,
};
