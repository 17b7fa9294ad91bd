//! Reorder instance aggregate implementation.

use chrono::{DateTime, Utc};
use common::InstanceId;
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{
    PlacedOrder, ReorderError, ReorderEvent, ReorderRequest, ReorderState, Step, StepOutput,
    StepResult,
    events::{InstanceCreatedData, InstanceFinishedData, StepRecordedData},
};

/// Stream type under which reorder instances are stored.
pub const REORDER_STREAM_TYPE: &str = "ReorderInstance";

/// Reorder instance aggregate root.
///
/// Tracks one execution of the reorder saga. The ordered `step_results` log
/// is what a resumed coordinator uses to decide where to continue.
#[derive(Debug, Clone, Default)]
pub struct ReorderInstance {
    id: Option<InstanceId>,
    version: Version,
    request: Option<ReorderRequest>,
    state: ReorderState,

    /// Final outcome per step, in the order the steps were first recorded.
    step_results: Vec<(Step, StepResult)>,

    placed_order: Option<PlacedOrder>,
    failed_attempts: u32,
    cancellation_requested: bool,
    cancellation_reason: Option<String>,
    failure_reason: Option<String>,
    idempotency_key: Option<String>,
    created_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Aggregate for ReorderInstance {
    type Event = ReorderEvent;
    type Error = ReorderError;

    fn aggregate_type() -> &'static str {
        REORDER_STREAM_TYPE
    }

    fn id(&self) -> Option<&InstanceId> {
        self.id.as_ref()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ReorderEvent::InstanceCreated(data) => self.apply_instance_created(data),
            ReorderEvent::StepStarted(data) => {
                self.state = data.step.running_state();
            }
            ReorderEvent::StepAttemptFailed(_) => {
                self.failed_attempts += 1;
            }
            ReorderEvent::StepRecorded(data) => self.apply_step_recorded(data),
            ReorderEvent::CancellationRequested(data) => {
                self.cancellation_requested = true;
                self.cancellation_reason = data.reason;
            }
            ReorderEvent::InstanceFinished(data) => self.apply_instance_finished(data),
        }
    }
}

// Query methods
impl ReorderInstance {
    pub fn request(&self) -> Option<&ReorderRequest> {
        self.request.as_ref()
    }

    pub fn state(&self) -> ReorderState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Recorded step outcomes in recording order.
    pub fn step_results(&self) -> &[(Step, StepResult)] {
        &self.step_results
    }

    pub fn result_for(&self, step: Step) -> Option<&StepResult> {
        self.step_results
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, result)| result)
    }

    /// The first step without a recorded result, i.e. where execution
    /// resumes. None once every step is recorded.
    pub fn next_pending_step(&self) -> Option<Step> {
        Step::ALL
            .into_iter()
            .find(|step| self.result_for(*step).is_none())
    }

    /// The supplier's order, present only once the instance completed.
    pub fn order_id(&self) -> Option<&str> {
        if self.state == ReorderState::Completed {
            self.placed_order.as_ref().map(|order| order.order_id.as_str())
        } else {
            None
        }
    }

    /// The order returned by a successful PlaceOrder step, even before the
    /// instance completes.
    pub fn placed_order(&self) -> Option<&PlacedOrder> {
        self.placed_order.as_ref()
    }

    pub fn metrics_published(&self) -> bool {
        self.result_for(Step::PublishMetrics)
            .is_some_and(|result| result.outcome.is_success())
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn cancellation_requested(&self) -> bool {
        self.cancellation_requested
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

// Command methods (return events)
impl ReorderInstance {
    /// Creates a new instance in the `Pending` state.
    pub fn create(
        &self,
        instance_id: InstanceId,
        request: ReorderRequest,
        idempotency_key: Option<String>,
    ) -> Result<Vec<ReorderEvent>, ReorderError> {
        if self.id.is_some() {
            return Err(ReorderError::AlreadyCreated);
        }
        request.validate()?;

        Ok(vec![ReorderEvent::instance_created(
            instance_id,
            request,
            idempotency_key,
        )])
    }

    /// Moves the instance into `step`'s running state.
    ///
    /// Re-starting the current step is allowed so a crashed attempt can be
    /// resumed; a step whose outcome is already recorded cannot start again.
    pub fn start_step(&self, step: Step) -> Result<Vec<ReorderEvent>, ReorderError> {
        self.ensure_active()?;

        if self.result_for(step).is_some() {
            return Err(ReorderError::StepAlreadyRecorded { step });
        }
        if let Some(missing) = Step::ALL
            .into_iter()
            .take_while(|earlier| *earlier < step)
            .find(|earlier| self.result_for(*earlier).is_none())
        {
            return Err(ReorderError::StepOutOfOrder { step, missing });
        }
        if !self.state.can_transition_to(step.running_state()) {
            return Err(ReorderError::InvalidStateTransition {
                current_state: self.state,
                action: "start step",
            });
        }

        Ok(vec![ReorderEvent::step_started(step)])
    }

    /// Starts `step`, or finishes the instance as `Cancelled` when a
    /// cancellation is pending and the step precedes order placement
    /// completion.
    ///
    /// Deciding both on the same loaded version means a concurrent
    /// cancellation either lands before the step starts or is refused.
    pub fn begin_step(&self, step: Step) -> Result<Vec<ReorderEvent>, ReorderError> {
        if self.cancellation_requested && step <= Step::PlaceOrder {
            self.ensure_active()?;
            return Ok(vec![ReorderEvent::instance_finished(
                ReorderState::Cancelled,
                Some(
                    self.cancellation_reason
                        .clone()
                        .unwrap_or_else(|| "cancelled by request".to_string()),
                ),
            )]);
        }
        self.start_step(step)
    }

    /// Records a failed attempt of the running step.
    pub fn record_attempt_failure(
        &self,
        step: Step,
        attempt: u32,
        error: impl Into<String>,
        retry_in_ms: Option<u64>,
    ) -> Result<Vec<ReorderEvent>, ReorderError> {
        self.ensure_running(step, "record attempt")?;

        Ok(vec![ReorderEvent::step_attempt_failed(
            step,
            attempt,
            error,
            retry_in_ms,
        )])
    }

    /// Records the final outcome of the running step.
    pub fn record_step(
        &self,
        step: Step,
        result: StepResult,
    ) -> Result<Vec<ReorderEvent>, ReorderError> {
        self.ensure_running(step, "record step")?;

        if self.result_for(step).is_some() {
            return Err(ReorderError::StepAlreadyRecorded { step });
        }

        Ok(vec![ReorderEvent::step_recorded(step, result)])
    }

    /// Moves the instance into a terminal state.
    pub fn finish(
        &self,
        state: ReorderState,
        reason: Option<String>,
    ) -> Result<Vec<ReorderEvent>, ReorderError> {
        self.ensure_active()?;

        if !state.is_terminal() || !self.state.can_transition_to(state) {
            return Err(ReorderError::InvalidStateTransition {
                current_state: self.state,
                action: "finish",
            });
        }
        if state == ReorderState::Completed && self.placed_order.is_none() {
            return Err(ReorderError::InvalidStateTransition {
                current_state: self.state,
                action: "complete without a placed order",
            });
        }

        Ok(vec![ReorderEvent::instance_finished(state, reason)])
    }

    /// Flags the instance for cancellation.
    ///
    /// Only allowed before order placement starts. Repeated requests are
    /// accepted without producing new events.
    pub fn request_cancellation(
        &self,
        reason: Option<String>,
    ) -> Result<Vec<ReorderEvent>, ReorderError> {
        self.ensure_active()?;

        if !self.state.can_cancel() {
            return Err(ReorderError::CancellationNotAllowed { state: self.state });
        }
        if self.cancellation_requested {
            return Ok(vec![]);
        }

        Ok(vec![ReorderEvent::cancellation_requested(reason)])
    }

    fn ensure_active(&self) -> Result<(), ReorderError> {
        if self.id.is_none() {
            return Err(ReorderError::NotCreated);
        }
        if self.state.is_terminal() {
            return Err(ReorderError::AlreadyTerminal { state: self.state });
        }
        Ok(())
    }

    fn ensure_running(&self, step: Step, action: &'static str) -> Result<(), ReorderError> {
        self.ensure_active()?;
        if self.state != step.running_state() {
            return Err(ReorderError::InvalidStateTransition {
                current_state: self.state,
                action,
            });
        }
        Ok(())
    }
}

// Event application helpers
impl ReorderInstance {
    fn apply_instance_created(&mut self, data: InstanceCreatedData) {
        self.id = Some(data.instance_id);
        self.request = Some(data.request);
        self.idempotency_key = data.idempotency_key;
        self.created_at = Some(data.created_at);
        self.state = ReorderState::Pending;
    }

    fn apply_step_recorded(&mut self, data: StepRecordedData) {
        if let Some(StepOutput::OrderPlaced(order)) = data.result.outcome.output() {
            self.placed_order = Some(order.clone());
        }

        match self.step_results.iter_mut().find(|(s, _)| *s == data.step) {
            Some((_, existing)) => *existing = data.result,
            None => self.step_results.push((data.step, data.result)),
        }
    }

    fn apply_instance_finished(&mut self, data: InstanceFinishedData) {
        self.state = data.state;
        self.completed_at = Some(data.finished_at);
        self.failure_reason = data.reason;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;
    use crate::reorder::{Availability, StepOutcome};

    fn request() -> ReorderRequest {
        ReorderRequest::new("S1", "P1", 50, "SUP1", 120.0).unwrap()
    }

    fn created() -> ReorderInstance {
        let mut instance = ReorderInstance::default();
        let events = instance
            .create(InstanceId::new("reorder-20240101000000"), request(), None)
            .unwrap();
        instance.apply_events(events);
        instance
    }

    fn run_step(instance: &mut ReorderInstance, step: Step, result: StepResult) {
        let events = instance.begin_step(step).unwrap();
        instance.apply_events(events);
        let events = instance.record_step(step, result).unwrap();
        instance.apply_events(events);
    }

    fn through_placement() -> ReorderInstance {
        let mut instance = created();
        run_step(
            &mut instance,
            Step::Validate,
            StepResult::succeeded(StepOutput::Validated { approved: true }, 1),
        );
        run_step(
            &mut instance,
            Step::CheckSupplier,
            StepResult::succeeded(
                StepOutput::SupplierChecked {
                    availability: Availability::Available,
                },
                1,
            ),
        );
        run_step(
            &mut instance,
            Step::PlaceOrder,
            StepResult::succeeded(StepOutput::OrderPlaced(PlacedOrder::new("ORDER-42")), 1),
        );
        instance
    }

    #[test]
    fn test_create_instance() {
        let instance = created();
        assert_eq!(instance.state(), ReorderState::Pending);
        assert_eq!(instance.id().map(InstanceId::as_str), Some("reorder-20240101000000"));
        assert_eq!(instance.next_pending_step(), Some(Step::Validate));
        assert!(instance.created_at().is_some());
        assert!(instance.order_id().is_none());
    }

    #[test]
    fn test_cannot_create_twice() {
        let instance = created();
        let err = instance
            .create(InstanceId::new("reorder-2"), request(), None)
            .unwrap_err();
        assert_eq!(err, ReorderError::AlreadyCreated);
    }

    #[test]
    fn test_commands_require_creation() {
        let instance = ReorderInstance::default();
        assert_eq!(
            instance.start_step(Step::Validate).unwrap_err(),
            ReorderError::NotCreated
        );
    }

    #[test]
    fn test_happy_path_completes_with_order_id() {
        let mut instance = through_placement();
        assert!(instance.order_id().is_none(), "order id only once completed");
        assert_eq!(
            instance.placed_order().map(|o| o.order_id.as_str()),
            Some("ORDER-42")
        );

        run_step(
            &mut instance,
            Step::PublishMetrics,
            StepResult::succeeded(StepOutput::MetricsPublished, 1),
        );
        run_step(
            &mut instance,
            Step::Notify,
            StepResult::succeeded(StepOutput::Notified, 1),
        );
        assert_eq!(instance.next_pending_step(), None);

        let events = instance.finish(ReorderState::Completed, None).unwrap();
        instance.apply_events(events);

        assert_eq!(instance.state(), ReorderState::Completed);
        assert_eq!(instance.order_id(), Some("ORDER-42"));
        assert!(instance.metrics_published());
        assert!(instance.completed_at().is_some());
        let steps: Vec<_> = instance.step_results().iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, Step::ALL);
    }

    #[test]
    fn test_cannot_complete_without_order() {
        let mut instance = created();
        run_step(
            &mut instance,
            Step::Validate,
            StepResult::succeeded(StepOutput::Validated { approved: true }, 1),
        );
        assert!(instance.finish(ReorderState::Completed, None).is_err());
    }

    #[test]
    fn test_steps_cannot_be_skipped_or_rerun() {
        let mut instance = created();
        assert_eq!(
            instance.start_step(Step::PlaceOrder).unwrap_err(),
            ReorderError::StepOutOfOrder {
                step: Step::PlaceOrder,
                missing: Step::Validate
            }
        );

        run_step(
            &mut instance,
            Step::Validate,
            StepResult::succeeded(StepOutput::Validated { approved: true }, 1),
        );
        assert_eq!(
            instance.start_step(Step::Validate).unwrap_err(),
            ReorderError::StepAlreadyRecorded {
                step: Step::Validate
            }
        );
    }

    #[test]
    fn test_running_step_can_be_restarted() {
        let mut instance = created();
        let events = instance.start_step(Step::Validate).unwrap();
        instance.apply_events(events);
        assert_eq!(instance.state(), ReorderState::Validating);

        // A crash before recording leaves the step pending.
        assert_eq!(instance.next_pending_step(), Some(Step::Validate));
        assert!(instance.start_step(Step::Validate).is_ok());
    }

    #[test]
    fn test_record_requires_running_step() {
        let instance = created();
        let err = instance
            .record_step(Step::Validate, StepResult::failed("boom", 1))
            .unwrap_err();
        assert!(matches!(err, ReorderError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_attempt_failures_are_counted() {
        let mut instance = created();
        let events = instance.start_step(Step::Validate).unwrap();
        instance.apply_events(events);
        let events = instance
            .record_attempt_failure(Step::Validate, 1, "timeout", Some(1000))
            .unwrap();
        instance.apply_events(events);
        assert_eq!(instance.failed_attempts(), 1);
    }

    #[test]
    fn test_rejected_is_terminal() {
        let mut instance = created();
        run_step(
            &mut instance,
            Step::Validate,
            StepResult::succeeded(StepOutput::Validated { approved: false }, 1),
        );
        let events = instance.finish(ReorderState::Rejected, None).unwrap();
        instance.apply_events(events);

        assert!(instance.is_terminal());
        assert_eq!(instance.step_results().len(), 1);
        assert_eq!(
            instance.start_step(Step::CheckSupplier).unwrap_err(),
            ReorderError::AlreadyTerminal {
                state: ReorderState::Rejected
            }
        );
        assert!(instance.finish(ReorderState::Failed, None).is_err());
    }

    #[test]
    fn test_cancellation_before_placement() {
        let mut instance = created();
        let events = instance
            .request_cancellation(Some("stock arrived".to_string()))
            .unwrap();
        instance.apply_events(events);
        assert!(instance.cancellation_requested());

        // Idempotent.
        assert!(instance.request_cancellation(None).unwrap().is_empty());

        let events = instance.begin_step(Step::Validate).unwrap();
        assert!(matches!(
            events.as_slice(),
            [ReorderEvent::InstanceFinished(InstanceFinishedData {
                state: ReorderState::Cancelled,
                ..
            })]
        ));
        instance.apply_events(events);
        assert_eq!(instance.state(), ReorderState::Cancelled);
        assert_eq!(instance.failure_reason(), Some("stock arrived"));
    }

    #[test]
    fn test_cancellation_refused_once_placing() {
        let mut instance = created();
        run_step(
            &mut instance,
            Step::Validate,
            StepResult::succeeded(StepOutput::Validated { approved: true }, 1),
        );
        run_step(
            &mut instance,
            Step::CheckSupplier,
            StepResult::succeeded(
                StepOutput::SupplierChecked {
                    availability: Availability::Available,
                },
                1,
            ),
        );
        let events = instance.start_step(Step::PlaceOrder).unwrap();
        instance.apply_events(events);

        assert_eq!(
            instance.request_cancellation(None).unwrap_err(),
            ReorderError::CancellationNotAllowed {
                state: ReorderState::Placing
            }
        );
    }

    #[test]
    fn test_retried_step_keeps_final_outcome() {
        let mut instance = through_placement();
        let events = instance.begin_step(Step::PublishMetrics).unwrap();
        instance.apply_events(events);

        // Replaying a duplicate record keeps a single entry per step.
        instance.apply(ReorderEvent::step_recorded(
            Step::PublishMetrics,
            StepResult::warning("sink down", 3),
        ));
        instance.apply(ReorderEvent::step_recorded(
            Step::PublishMetrics,
            StepResult::succeeded(StepOutput::MetricsPublished, 1),
        ));

        let metrics: Vec<_> = instance
            .step_results()
            .iter()
            .filter(|(s, _)| *s == Step::PublishMetrics)
            .collect();
        assert_eq!(metrics.len(), 1);
        assert!(matches!(
            metrics[0].1.outcome,
            StepOutcome::Succeeded { .. }
        ));
    }
}
