use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventEnvelope, EventStoreError, InstanceId, Result, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

#[derive(Default)]
struct Streams {
    events: HashMap<InstanceId, Vec<EventEnvelope>>,
    /// Stream IDs in creation order.
    created: Vec<InstanceId>,
}

/// In-memory event store implementation.
///
/// Used by tests and by the server when no database is configured. It
/// provides the same concurrency guarantees as the PostgreSQL
/// implementation but does not survive a restart.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Streams>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let stream_id = events[0].stream_id.clone();
        let first_new_version = events[0].version;

        let mut inner = self.inner.write().await;

        let current_version = inner
            .events
            .get(&stream_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version)
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected,
                actual: current_version,
            });
        }

        // Unique (stream_id, version) constraint
        if first_new_version != current_version.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial());

        if !inner.events.contains_key(&stream_id) {
            inner.created.push(stream_id.clone());
        }
        inner.events.entry(stream_id).or_default().extend(events);

        Ok(last_version)
    }

    async fn get_events(&self, stream_id: &InstanceId) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        Ok(inner.events.get(stream_id).cloned().unwrap_or_default())
    }

    async fn get_stream_version(&self, stream_id: &InstanceId) -> Result<Option<Version>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .get(stream_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version))
    }

    async fn list_streams(&self, stream_type: &str) -> Result<Vec<InstanceId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .created
            .iter()
            .filter(|id| {
                inner
                    .events
                    .get(*id)
                    .and_then(|stream| stream.first())
                    .is_some_and(|e| e.stream_type == stream_type)
            })
            .cloned()
            .collect())
    }

    async fn find_stream_by_metadata(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<InstanceId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .created
            .iter()
            .find(|id| {
                inner.events.get(*id).is_some_and(|stream| {
                    stream
                        .iter()
                        .any(|e| e.metadata.get(key).is_some_and(|v| v == value))
                })
            })
            .cloned())
    }
}
