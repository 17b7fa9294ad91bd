//! Append-only event log for reorder instances.
//!
//! Every reorder instance owns one stream, keyed by its [`InstanceId`].
//! Appends are guarded by an expected stream version, so a writer that has
//! fallen behind gets a [`EventStoreError::ConcurrencyConflict`] instead of
//! interleaving its updates with another writer's.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::InstanceId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt};
