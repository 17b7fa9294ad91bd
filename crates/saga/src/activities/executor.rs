//! Activity executor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{IdempotencyKey, InstanceId};
use domain::{PlacedOrder, ReorderRequest, Step, StepOutput};

use super::ActivityError;
use crate::services::{
    MetricsSink, NotificationChannel, ReorderPlacedEvent, RuleStore, SupplierClient,
};

/// Per-activity call timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityTimeouts {
    pub validate: Duration,
    pub check_supplier: Duration,
    pub place_order: Duration,
    pub publish_metrics: Duration,
    pub notify: Duration,
}

impl ActivityTimeouts {
    /// The same timeout for every activity.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            validate: timeout,
            check_supplier: timeout,
            place_order: timeout,
            publish_metrics: timeout,
            notify: timeout,
        }
    }

    pub fn for_step(&self, step: Step) -> Duration {
        match step {
            Step::Validate => self.validate,
            Step::CheckSupplier => self.check_supplier,
            Step::PlaceOrder => self.place_order,
            Step::PublishMetrics => self.publish_metrics,
            Step::Notify => self.notify,
        }
    }
}

impl Default for ActivityTimeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(30))
    }
}

/// The external systems the saga talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub rules: Arc<dyn RuleStore>,
    pub supplier: Arc<dyn SupplierClient>,
    pub metrics: Arc<dyn MetricsSink>,
    pub notifier: Arc<dyn NotificationChannel>,
}

/// Input shared by every activity of one instance.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub instance_id: InstanceId,
    pub request: ReorderRequest,

    /// The order placed by an earlier step, needed by the reporting steps.
    pub placed_order: Option<PlacedOrder>,
}

/// Runs the activity behind each saga step with its own timeout.
///
/// Side effects are confined here so the coordinator only decides state
/// transitions. Every activity is safe to call more than once for the same
/// instance: order placement passes an idempotency token derived from the
/// instance ID.
#[derive(Clone)]
pub struct ActivityExecutor {
    collaborators: Collaborators,
    timeouts: ActivityTimeouts,
}

impl ActivityExecutor {
    pub fn new(collaborators: Collaborators, timeouts: ActivityTimeouts) -> Self {
        Self {
            collaborators,
            timeouts,
        }
    }

    pub fn timeouts(&self) -> &ActivityTimeouts {
        &self.timeouts
    }

    /// Runs the activity for `step` once.
    pub async fn execute(
        &self,
        step: Step,
        context: &ActivityContext,
    ) -> Result<StepOutput, ActivityError> {
        match step {
            Step::Validate => {
                let approved = self.validate(&context.request).await?;
                Ok(StepOutput::Validated { approved })
            }
            Step::CheckSupplier => {
                let availability = self
                    .bounded(step, async {
                        self.collaborators
                            .supplier
                            .check_availability(
                                &context.request.supplier_id,
                                &context.request.product_id,
                            )
                            .await
                    })
                    .await?;
                Ok(StepOutput::SupplierChecked { availability })
            }
            Step::PlaceOrder => {
                let key = placement_key(&context.instance_id);
                let order = self
                    .bounded(step, async {
                        self.collaborators
                            .supplier
                            .place_order(&context.request, &key)
                            .await
                    })
                    .await?;
                Ok(StepOutput::OrderPlaced(order))
            }
            Step::PublishMetrics => {
                let event = placed_event(context)?;
                self.bounded(step, self.collaborators.metrics.publish(&event))
                    .await?;
                Ok(StepOutput::MetricsPublished)
            }
            Step::Notify => {
                let event = placed_event(context)?;
                self.bounded(step, self.collaborators.notifier.send(&event))
                    .await?;
                Ok(StepOutput::Notified)
            }
        }
    }

    /// Checks the request against the reorder rules.
    pub async fn validate(&self, request: &ReorderRequest) -> Result<bool, ActivityError> {
        if let Err(e) = request.validate() {
            return Err(ActivityError::permanent(e.to_string()));
        }
        self.bounded(Step::Validate, self.collaborators.rules.validate(request))
            .await
    }

    async fn bounded<T, F>(&self, step: Step, call: F) -> Result<T, ActivityError>
    where
        F: Future<Output = Result<T, ActivityError>>,
    {
        let limit = self.timeouts.for_step(step);
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::timeout(step.as_str(), limit)),
        }
    }
}

/// Idempotency token for the supplier order of an instance.
pub fn placement_key(instance_id: &InstanceId) -> IdempotencyKey {
    IdempotencyKey::for_step(instance_id, Step::PlaceOrder.as_str())
}

fn placed_event(context: &ActivityContext) -> Result<ReorderPlacedEvent, ActivityError> {
    let order = context
        .placed_order
        .as_ref()
        .ok_or_else(|| ActivityError::permanent("no placed order recorded for this instance"))?;
    Ok(ReorderPlacedEvent::new(
        context.instance_id.clone(),
        &context.request,
        order,
    ))
}
