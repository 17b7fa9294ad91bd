//! Reorder service providing a simplified API for instance operations.

use common::{IdempotencyKey, InstanceId};
use event_store::{EventStore, EventStoreError, EventStoreExt};

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{
    REORDER_STREAM_TYPE, ReorderError, ReorderEvent, ReorderInstance, ReorderRequest,
    ReorderState, Step, StepResult,
};

/// Metadata key under which the caller-supplied idempotency key is stored.
pub const IDEMPOTENCY_METADATA_KEY: &str = "idempotency_key";

/// How many times a command is re-decided after losing an append race.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Service for managing reorder instances.
///
/// Wraps the command handler with one method per transition. Every
/// transition is decided on freshly loaded state and appended with an
/// expected version, so concurrent writers to one instance are serialized
/// by the store.
pub struct ReorderService<S: EventStore> {
    handler: CommandHandler<S, ReorderInstance>,
}

impl<S: EventStore> ReorderService<S> {
    /// Creates a new reorder service with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, ReorderInstance> {
        &self.handler
    }

    /// Persists a new `Pending` instance.
    #[tracing::instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn create_instance(
        &self,
        instance_id: InstanceId,
        request: ReorderRequest,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<CommandResult<ReorderInstance>, DomainError> {
        let key = idempotency_key.map(|k| k.as_str().to_string());
        let metadata: Vec<(&str, &str)> = key
            .as_deref()
            .map(|k| vec![(IDEMPOTENCY_METADATA_KEY, k)])
            .unwrap_or_default();

        let result = self
            .handler
            .execute_with_metadata(&instance_id, &metadata, |instance| {
                instance.create(instance_id.clone(), request, key.clone())
            })
            .await?;

        metrics::counter!("reorder_instances_created_total").increment(1);
        Ok(result)
    }

    /// Starts a step, or finishes the instance as cancelled if a
    /// cancellation is pending.
    pub async fn begin_step(
        &self,
        instance_id: &InstanceId,
        step: Step,
    ) -> Result<CommandResult<ReorderInstance>, DomainError> {
        self.execute_retrying(instance_id, |instance| instance.begin_step(step))
            .await
    }

    pub async fn record_attempt_failure(
        &self,
        instance_id: &InstanceId,
        step: Step,
        attempt: u32,
        error: &str,
        retry_in_ms: Option<u64>,
    ) -> Result<CommandResult<ReorderInstance>, DomainError> {
        self.execute_retrying(instance_id, |instance| {
            instance.record_attempt_failure(step, attempt, error, retry_in_ms)
        })
        .await
    }

    pub async fn record_step(
        &self,
        instance_id: &InstanceId,
        step: Step,
        result: StepResult,
    ) -> Result<CommandResult<ReorderInstance>, DomainError> {
        self.execute_retrying(instance_id, |instance| {
            instance.record_step(step, result.clone())
        })
        .await
    }

    pub async fn finish(
        &self,
        instance_id: &InstanceId,
        state: ReorderState,
        reason: Option<String>,
    ) -> Result<CommandResult<ReorderInstance>, DomainError> {
        self.execute_retrying(instance_id, |instance| {
            instance.finish(state, reason.clone())
        })
        .await
    }

    /// Flags an instance for cancellation.
    #[tracing::instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn request_cancellation(
        &self,
        instance_id: &InstanceId,
        reason: Option<String>,
    ) -> Result<CommandResult<ReorderInstance>, DomainError> {
        self.require(instance_id).await?;
        self.execute_retrying(instance_id, |instance| {
            instance.request_cancellation(reason.clone())
        })
        .await
    }

    /// Loads an instance, returning None if it doesn't exist.
    pub async fn get_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<ReorderInstance>, DomainError> {
        self.handler.load_existing(instance_id).await
    }

    /// Loads an instance, failing with `InstanceNotFound` if it doesn't exist.
    pub async fn require(&self, instance_id: &InstanceId) -> Result<ReorderInstance, DomainError> {
        self.get_instance(instance_id)
            .await?
            .ok_or_else(|| DomainError::InstanceNotFound(instance_id.clone()))
    }

    /// Returns all instance IDs, oldest first.
    pub async fn list_instance_ids(&self) -> Result<Vec<InstanceId>, DomainError> {
        Ok(self.handler.store().list_streams(REORDER_STREAM_TYPE).await?)
    }

    /// Finds the instance created with the given idempotency key.
    pub async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<InstanceId>, DomainError> {
        Ok(self
            .handler
            .store()
            .find_stream_by_metadata(IDEMPOTENCY_METADATA_KEY, key.as_str())
            .await?)
    }

    /// Returns true if an instance with this ID has been persisted.
    pub async fn exists(&self, instance_id: &InstanceId) -> Result<bool, DomainError> {
        Ok(self.handler.store().stream_exists(instance_id).await?)
    }

    async fn execute_retrying<F>(
        &self,
        instance_id: &InstanceId,
        command_fn: F,
    ) -> Result<CommandResult<ReorderInstance>, DomainError>
    where
        F: Fn(&ReorderInstance) -> Result<Vec<ReorderEvent>, ReorderError>,
    {
        let mut conflicts = 0;
        loop {
            match self.handler.execute(instance_id, &command_fn).await {
                Err(DomainError::EventStore(EventStoreError::ConcurrencyConflict { .. }))
                    if conflicts < MAX_CONFLICT_RETRIES =>
                {
                    conflicts += 1;
                    metrics::counter!("reorder_command_conflicts_total").increment(1);
                    tracing::debug!(%instance_id, conflicts, "append conflict, re-deciding command");
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorder::{PlacedOrder, StepOutput};
    use event_store::InMemoryEventStore;

    fn request() -> ReorderRequest {
        ReorderRequest::new("S1", "P1", 50, "SUP1", 120.0).unwrap()
    }

    async fn create(service: &ReorderService<InMemoryEventStore>, id: &str) -> InstanceId {
        let id = InstanceId::new(id);
        service
            .create_instance(id.clone(), request(), None)
            .await
            .unwrap();
        id
    }

    async fn run_step(
        service: &ReorderService<InMemoryEventStore>,
        id: &InstanceId,
        step: Step,
        output: StepOutput,
    ) {
        service.begin_step(id, step).await.unwrap();
        service
            .record_step(id, step, StepResult::succeeded(output, 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let service = ReorderService::new(InMemoryEventStore::new());
        let id = create(&service, "reorder-1").await;

        let instance = service.get_instance(&id).await.unwrap().unwrap();
        assert_eq!(instance.state(), ReorderState::Pending);
        assert_eq!(instance.request(), Some(&request()));
        assert!(service.exists(&id).await.unwrap());
        assert_eq!(service.list_instance_ids().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let service = ReorderService::new(InMemoryEventStore::new());
        let id = InstanceId::new("reorder-missing");

        assert!(service.get_instance(&id).await.unwrap().is_none());
        assert!(!service.exists(&id).await.unwrap());
        assert!(matches!(
            service.require(&id).await,
            Err(DomainError::InstanceNotFound(_))
        ));
        assert!(matches!(
            service.request_cancellation(&id, None).await,
            Err(DomainError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let service = ReorderService::new(InMemoryEventStore::new());
        let id = create(&service, "reorder-1").await;

        let err = service
            .create_instance(id, request(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Reorder(ReorderError::AlreadyCreated)
        ));
    }

    #[tokio::test]
    async fn test_find_by_idempotency_key() {
        let service = ReorderService::new(InMemoryEventStore::new());
        let key = IdempotencyKey::new("client-key-1");
        let id = InstanceId::new("reorder-1");
        service
            .create_instance(id.clone(), request(), Some(key.clone()))
            .await
            .unwrap();

        assert_eq!(service.find_by_idempotency_key(&key).await.unwrap(), Some(id.clone()));
        assert_eq!(
            service
                .find_by_idempotency_key(&IdempotencyKey::new("other"))
                .await
                .unwrap(),
            None
        );
        let instance = service.require(&id).await.unwrap();
        assert_eq!(instance.idempotency_key(), Some("client-key-1"));
    }

    #[tokio::test]
    async fn test_full_lifecycle_persists() {
        let service = ReorderService::new(InMemoryEventStore::new());
        let id = create(&service, "reorder-1").await;

        run_step(&service, &id, Step::Validate, StepOutput::Validated { approved: true }).await;
        run_step(
            &service,
            &id,
            Step::CheckSupplier,
            StepOutput::SupplierChecked {
                availability: crate::reorder::Availability::Available,
            },
        )
        .await;
        run_step(
            &service,
            &id,
            Step::PlaceOrder,
            StepOutput::OrderPlaced(PlacedOrder::new("ORDER-42")),
        )
        .await;
        run_step(&service, &id, Step::PublishMetrics, StepOutput::MetricsPublished).await;
        run_step(&service, &id, Step::Notify, StepOutput::Notified).await;
        service
            .finish(&id, ReorderState::Completed, None)
            .await
            .unwrap();

        let instance = service.require(&id).await.unwrap();
        assert_eq!(instance.state(), ReorderState::Completed);
        assert_eq!(instance.order_id(), Some("ORDER-42"));
        assert_eq!(instance.step_results().len(), 5);
    }

    #[tokio::test]
    async fn test_cancellation_then_begin_step_cancels() {
        let service = ReorderService::new(InMemoryEventStore::new());
        let id = create(&service, "reorder-1").await;

        service
            .request_cancellation(&id, Some("no longer needed".to_string()))
            .await
            .unwrap();
        let result = service.begin_step(&id, Step::Validate).await.unwrap();

        assert_eq!(result.aggregate.state(), ReorderState::Cancelled);
        assert!(result.aggregate.step_results().is_empty());
    }

    #[tokio::test]
    async fn test_attempt_failure_recorded() {
        let service = ReorderService::new(InMemoryEventStore::new());
        let id = create(&service, "reorder-1").await;
        service.begin_step(&id, Step::Validate).await.unwrap();
        let result = service
            .record_attempt_failure(&id, Step::Validate, 1, "timeout", Some(1000))
            .await
            .unwrap();

        assert_eq!(result.aggregate.failed_attempts(), 1);
        assert_eq!(result.new_version.as_i64(), 3);
    }
}
