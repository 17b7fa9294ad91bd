//! Shared identifier types for the reorder engine.

pub mod types;

pub use types::{INSTANCE_ID_PREFIX, IdempotencyKey, InstanceId};
