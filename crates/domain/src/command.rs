//! Command handling infrastructure.

use std::marker::PhantomData;

use common::InstanceId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Handler for executing commands against aggregates.
///
/// The handler is responsible for:
/// 1. Loading the aggregate by replaying its stream
/// 2. Executing the command to produce events
/// 3. Appending the events with an expected-version check
///
/// The store's write lock is held only for the duration of the append, so
/// readers are never blocked by a command that is still deciding.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from the event store.
    ///
    /// If the stream doesn't exist, returns a default instance.
    pub async fn load(&self, id: &InstanceId) -> Result<A, DomainError>
    where
        A::Event: DeserializeOwned,
    {
        let events = self.store.get_events(id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, id: &InstanceId) -> Result<Option<A>, DomainError>
    where
        A::Event: DeserializeOwned,
    {
        let aggregate = self.load(id).await?;
        if aggregate.id().is_some() {
            Ok(Some(aggregate))
        } else {
            Ok(None)
        }
    }

    /// Executes a command and persists the resulting events.
    ///
    /// The command function receives the current aggregate state and returns
    /// either a list of events to apply, or an error.
    pub async fn execute<F>(&self, id: &InstanceId, command_fn: F) -> Result<CommandResult<A>, DomainError>
    where
        A::Event: DeserializeOwned + Serialize,
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.execute_with_metadata(id, &[], command_fn).await
    }

    /// Like [`execute`](Self::execute), attaching `metadata` to every
    /// appended envelope so the stream can later be found by it.
    pub async fn execute_with_metadata<F>(
        &self,
        id: &InstanceId,
        metadata: &[(&str, &str)],
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        A::Event: DeserializeOwned + Serialize,
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(id, current_version, &events, metadata)?;

        let options = if current_version == Version::initial() {
            AppendOptions::expect_new()
        } else {
            AppendOptions::expect_version(current_version)
        };

        let new_version = self.store.append(envelopes, options).await?;

        for event in &events {
            aggregate.apply(event.clone());
        }
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    fn build_envelopes(
        &self,
        id: &InstanceId,
        current_version: Version,
        events: &[A::Event],
        metadata: &[(&str, &str)],
    ) -> Result<Vec<EventEnvelope>, DomainError>
    where
        A::Event: Serialize,
    {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let mut builder = EventEnvelope::builder()
                .stream_id(id.clone())
                .stream_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?;
            for (key, value) in metadata {
                builder = builder.metadata(*key, *value);
            }
            envelopes.push(builder.build()?);
        }

        Ok(envelopes)
    }
}
