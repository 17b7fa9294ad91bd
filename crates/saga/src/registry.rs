//! Workflow registry: instance creation, status queries and cancellation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use common::{IdempotencyKey, InstanceId};
use domain::{
    DomainError, ReorderError, ReorderInstance, ReorderRequest, ReorderService, ReorderState,
    Step, StepResult,
};
use event_store::{EventStore, EventStoreError};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::coordinator::ReorderCoordinator;
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::{Result, SagaError};

/// Attempts at creating an instance whose freshly allocated ID was
/// persisted by another writer first.
const MAX_ID_COLLISIONS: u32 = 5;

/// Result of accepting a reorder request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub instance_id: InstanceId,

    /// False when an earlier submission with the same idempotency key was
    /// returned instead of creating a new instance.
    pub created: bool,
}

/// One recorded step in a status response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResultView {
    pub step: Step,
    #[serde(flatten)]
    pub result: StepResult,
}

/// Full status of one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStatus {
    pub instance_id: InstanceId,
    pub state: ReorderState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_delivery: Option<NaiveDate>,
    pub metrics_published: bool,
    pub cancellation_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub failed_attempts: u32,
    pub request: Option<ReorderRequest>,
    pub step_results: Vec<StepResultView>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InstanceStatus {
    pub fn from_instance(instance_id: &InstanceId, instance: &ReorderInstance) -> Self {
        Self {
            instance_id: instance_id.clone(),
            state: instance.state(),
            order_id: instance.order_id().map(str::to_string),
            estimated_delivery: instance
                .order_id()
                .and(instance.placed_order())
                .and_then(|order| order.estimated_delivery),
            metrics_published: instance.metrics_published(),
            cancellation_requested: instance.cancellation_requested(),
            failure_reason: instance.failure_reason().map(str::to_string),
            failed_attempts: instance.failed_attempts(),
            request: instance.request().cloned(),
            step_results: instance
                .step_results()
                .iter()
                .map(|(step, result)| StepResultView {
                    step: *step,
                    result: result.clone(),
                })
                .collect(),
            created_at: instance.created_at(),
            completed_at: instance.completed_at(),
        }
    }
}

/// Short listing entry for an instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSummary {
    pub instance_id: InstanceId,
    pub state: ReorderState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Accepts reorder requests, allocates instance IDs and answers status
/// queries. Execution is delegated to the [`Dispatcher`].
pub struct ReorderRegistry<S: EventStore> {
    service: Arc<ReorderService<S>>,
    dispatcher: Dispatcher,

    /// IDs handed out but not yet persisted.
    reserved: Mutex<HashSet<InstanceId>>,

    /// Serializes keyed submissions so one key creates at most one instance.
    keyed_submissions: Mutex<()>,
}

impl<S: EventStore + 'static> ReorderRegistry<S> {
    /// Starts a dispatcher for `coordinator` and wraps it in a registry.
    pub fn start(coordinator: Arc<ReorderCoordinator<S>>, config: DispatcherConfig) -> Self {
        let service = Arc::clone(coordinator.service());
        let dispatcher = Dispatcher::start(coordinator, config);
        Self {
            service,
            dispatcher,
            reserved: Mutex::new(HashSet::new()),
            keyed_submissions: Mutex::new(()),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn service(&self) -> &Arc<ReorderService<S>> {
        &self.service
    }

    /// Persists a new `Pending` instance and queues it for execution.
    ///
    /// With an idempotency key, a repeated submission of the same request
    /// returns the existing instance; a different request under the same
    /// key is refused.
    #[tracing::instrument(skip_all, fields(store_id = %request.store_id, product_id = %request.product_id))]
    pub async fn submit(
        &self,
        request: ReorderRequest,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<Submission> {
        request.validate().map_err(SagaError::InvalidRequest)?;

        let instance_id = {
            let _keyed = match idempotency_key {
                Some(_) => Some(self.keyed_submissions.lock().await),
                None => None,
            };

            if let Some(key) = &idempotency_key {
                if let Some(existing) = self.existing_submission(key, &request).await? {
                    return Ok(existing);
                }
            }

            let mut collisions = 0;
            loop {
                let instance_id = self.allocate_id().await?;
                let created = self
                    .service
                    .create_instance(instance_id.clone(), request.clone(), idempotency_key.clone())
                    .await;
                self.reserved.lock().await.remove(&instance_id);
                match created {
                    Ok(_) => break instance_id,
                    Err(e) if is_id_collision(&e) && collisions < MAX_ID_COLLISIONS => {
                        collisions += 1;
                        tracing::debug!(
                            %instance_id,
                            collisions,
                            "instance id taken by another writer, allocating the next one"
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        tracing::info!(%instance_id, "reorder instance created");
        self.dispatcher.dispatch(instance_id.clone()).await?;

        Ok(Submission {
            instance_id,
            created: true,
        })
    }

    /// Returns the current status of an instance.
    pub async fn status(&self, instance_id: &InstanceId) -> Result<InstanceStatus> {
        let instance = self.load(instance_id).await?;
        Ok(InstanceStatus::from_instance(instance_id, &instance))
    }

    /// Lists all instances, oldest first.
    pub async fn list(&self) -> Result<Vec<InstanceSummary>> {
        let mut summaries = Vec::new();
        for instance_id in self.service.list_instance_ids().await? {
            if let Some(instance) = self.service.get_instance(&instance_id).await? {
                summaries.push(InstanceSummary {
                    state: instance.state(),
                    order_id: instance.order_id().map(str::to_string),
                    created_at: instance.created_at(),
                    instance_id,
                });
            }
        }
        Ok(summaries)
    }

    /// Requests cancellation of an instance that has not started placing
    /// its order.
    #[tracing::instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn cancel(
        &self,
        instance_id: &InstanceId,
        reason: Option<String>,
    ) -> Result<InstanceStatus> {
        match self.service.request_cancellation(instance_id, reason).await {
            Ok(result) => {
                tracing::info!("cancellation requested");
                Ok(InstanceStatus::from_instance(instance_id, &result.aggregate))
            }
            Err(DomainError::InstanceNotFound(id)) => Err(SagaError::InstanceNotFound(id)),
            Err(DomainError::Reorder(
                ReorderError::CancellationNotAllowed { state } | ReorderError::AlreadyTerminal { state },
            )) => Err(SagaError::CancellationRefused {
                instance_id: instance_id.clone(),
                state,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-queues every non-terminal instance. Called once on startup so
    /// instances interrupted by a crash resume at their first unrecorded
    /// step.
    pub async fn recover(&self) -> Result<usize> {
        let mut resumed = 0;
        for instance_id in self.service.list_instance_ids().await? {
            let Some(instance) = self.service.get_instance(&instance_id).await? else {
                continue;
            };
            if instance.is_terminal() || self.dispatcher.is_running(&instance_id).await {
                continue;
            }
            tracing::info!(%instance_id, state = %instance.state(), "resuming reorder instance");
            self.dispatcher.dispatch(instance_id).await?;
            resumed += 1;
        }
        metrics::counter!("reorder_instances_recovered_total").increment(resumed as u64);
        tracing::info!(resumed, "recovery finished");
        Ok(resumed)
    }

    async fn load(&self, instance_id: &InstanceId) -> Result<ReorderInstance> {
        self.service
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| SagaError::InstanceNotFound(instance_id.clone()))
    }

    async fn existing_submission(
        &self,
        key: &IdempotencyKey,
        request: &ReorderRequest,
    ) -> Result<Option<Submission>> {
        let Some(instance_id) = self.service.find_by_idempotency_key(key).await? else {
            return Ok(None);
        };
        let instance = self.load(&instance_id).await?;
        if instance.request() != Some(request) {
            return Err(SagaError::IdempotencyConflict {
                key: key.as_str().to_string(),
            });
        }
        tracing::debug!(%instance_id, "idempotent resubmission, returning existing instance");
        Ok(Some(Submission {
            instance_id,
            created: false,
        }))
    }

    /// Allocates `reorder-<timestamp>`, adding a numeric suffix when the ID
    /// is already persisted or reserved by a concurrent submission.
    async fn allocate_id(&self) -> Result<InstanceId> {
        let base = InstanceId::from_timestamp(Utc::now());
        let mut reserved = self.reserved.lock().await;
        let mut n = 1;
        loop {
            let candidate = base.with_suffix(n);
            if !reserved.contains(&candidate) && !self.service.exists(&candidate).await? {
                reserved.insert(candidate.clone());
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

/// True if creating an instance failed because its stream already exists.
fn is_id_collision(error: &DomainError) -> bool {
    matches!(
        error,
        DomainError::EventStore(EventStoreError::ConcurrencyConflict { .. })
            | DomainError::Reorder(ReorderError::AlreadyCreated)
    )
}
