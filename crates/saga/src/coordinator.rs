//! Workflow coordinator driving one reorder instance through the saga.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::InstanceId;
use domain::{
    DomainError, ReorderInstance, ReorderService, ReorderState, Step, StepOutcome, StepOutput, StepResult,
};
use event_store::{EventStore, EventStoreError};
use serde::Serialize;

use crate::activities::{ActivityContext, ActivityError, ActivityExecutor};
use crate::error::SagaError;
use crate::retry::{RetryObserver, RetryPolicy, Sleeper, TokioSleeper};

/// Result of a saga run that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReorderOutcome {
    pub instance_id: InstanceId,
    pub state: ReorderState,
    pub order_id: Option<String>,
    pub estimated_delivery: Option<NaiveDate>,
    pub metrics_published: bool,
}

impl ReorderOutcome {
    fn from_instance(instance_id: &InstanceId, instance: &ReorderInstance) -> Self {
        Self {
            instance_id: instance_id.clone(),
            state: instance.state(),
            order_id: instance.order_id().map(str::to_string),
            estimated_delivery: instance
                .order_id()
                .and(instance.placed_order())
                .and_then(|order| order.estimated_delivery),
            metrics_published: instance.metrics_published(),
        }
    }
}

/// What the coordinator does next for an instance.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Decision {
    Run(Step),
    Finish(ReorderState, Option<String>),
}

impl Decision {
    /// True if `instance` already reflects this decision, carried out by
    /// someone else.
    fn taken_over_by(&self, instance: &ReorderInstance) -> bool {
        match self {
            Decision::Run(step) => instance.is_terminal() || instance.result_for(*step).is_some(),
            Decision::Finish(..) => instance.is_terminal(),
        }
    }
}

/// Derives the next action from the recorded step results alone, so a
/// resumed instance continues exactly where the last run stopped.
pub(crate) fn decide(instance: &ReorderInstance) -> Decision {
    for (step, result) in instance.step_results() {
        match &result.outcome {
            StepOutcome::Failed { error } if step.is_fatal() => {
                return Decision::Finish(ReorderState::Failed, Some(format!("{step}: {error}")));
            }
            StepOutcome::Succeeded {
                output: StepOutput::Validated { approved: false },
            } => {
                return Decision::Finish(
                    ReorderState::Rejected,
                    Some("request rejected by reorder rules".to_string()),
                );
            }
            StepOutcome::Succeeded {
                output: StepOutput::SupplierChecked { availability },
            } if !availability.is_available() => {
                return Decision::Finish(
                    ReorderState::SupplierUnavailable,
                    Some("supplier reported the product unavailable".to_string()),
                );
            }
            _ => {}
        }
    }

    match instance.next_pending_step() {
        Some(step) => Decision::Run(step),
        None => Decision::Finish(ReorderState::Completed, None),
    }
}

/// Orchestrates the five-step reorder saga for one instance at a time.
///
/// The coordinator is stateless between calls: every decision is taken
/// from the instance's persisted step results, and every transition is
/// appended before the next step runs. Running it again for an instance
/// never repeats a step whose result is already recorded.
pub struct ReorderCoordinator<S: EventStore> {
    service: Arc<ReorderService<S>>,
    executor: ActivityExecutor,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<S: EventStore> ReorderCoordinator<S> {
    /// Creates a coordinator that waits between retries with the tokio timer.
    pub fn new(
        service: Arc<ReorderService<S>>,
        executor: ActivityExecutor,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            executor,
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replaces the sleeper used for backoff waits.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn service(&self) -> &Arc<ReorderService<S>> {
        &self.service
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }

    /// Runs the instance until it reaches a terminal state.
    ///
    /// `Rejected`, `SupplierUnavailable`, `Cancelled` and `Completed` are
    /// returned as outcomes. Only `Failed` is returned as an error.
    #[tracing::instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn run(&self, instance_id: &InstanceId) -> Result<ReorderOutcome, SagaError> {
        let mut instance = self
            .service
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| SagaError::InstanceNotFound(instance_id.clone()))?;

        loop {
            if instance.is_terminal() {
                return conclude(instance_id, &instance);
            }

            let decision = decide(&instance);
            match self.apply(instance_id, &decision).await {
                Ok(next) => instance = next,
                Err(e) if lost_race(&e) => {
                    let current = self.service.require(instance_id).await?;
                    if !decision.taken_over_by(&current) {
                        return Err(e);
                    }
                    tracing::info!(
                        error = %e,
                        state = %current.state(),
                        "instance advanced by a concurrent run, resuming from its state"
                    );
                    instance = current;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Carries out one decision and returns the instance as persisted
    /// afterwards.
    async fn apply(
        &self,
        instance_id: &InstanceId,
        decision: &Decision,
    ) -> Result<ReorderInstance, SagaError> {
        match decision {
            Decision::Finish(state, reason) => {
                let finished = self
                    .service
                    .finish(instance_id, *state, reason.clone())
                    .await?
                    .aggregate;
                observe_terminal(instance_id, &finished);
                Ok(finished)
            }
            Decision::Run(step) => {
                let step = *step;
                let started = self.service.begin_step(instance_id, step).await?.aggregate;
                if started.is_terminal() {
                    observe_terminal(instance_id, &started);
                    return Ok(started);
                }

                let result = self.run_step(instance_id, step, &started).await?;
                Ok(self
                    .service
                    .record_step(instance_id, step, result)
                    .await?
                    .aggregate)
            }
        }
    }

    /// Runs one step under the retry policy and converts the final outcome
    /// into a step result.
    async fn run_step(
        &self,
        instance_id: &InstanceId,
        step: Step,
        instance: &ReorderInstance,
    ) -> Result<StepResult, SagaError> {
        let request = instance
            .request()
            .cloned()
            .ok_or_else(|| SagaError::InstanceNotFound(instance_id.clone()))?;
        let context = ActivityContext {
            instance_id: instance_id.clone(),
            request,
            placed_order: instance.placed_order().cloned(),
        };

        tracing::info!(step = %step, "saga step started");

        let observer = AttemptRecorder {
            service: self.service.as_ref(),
            instance_id,
            step,
        };
        let executor = &self.executor;
        let context = &context;
        let outcome = self
            .policy
            .execute(self.sleeper.as_ref(), &observer, move |attempt| {
                metrics::counter!("reorder_step_attempts_total", "step" => step.as_str())
                    .increment(1);
                tracing::debug!(step = %step, attempt, "running activity");
                executor.execute(step, context)
            })
            .await;

        let attempts = outcome.attempts;
        Ok(match outcome.result {
            Ok(output) => {
                tracing::info!(step = %step, attempts, "saga step succeeded");
                StepResult::succeeded(output, attempts)
            }
            Err(error) if step.is_fatal() => {
                tracing::error!(step = %step, attempts, error = %error, "fatal saga step failed");
                StepResult::failed(error.to_string(), attempts)
            }
            Err(error) => {
                tracing::warn!(
                    step = %step,
                    attempts,
                    error = %error,
                    "non-fatal saga step failed, continuing"
                );
                StepResult::warning(error.to_string(), attempts)
            }
        })
    }
}

/// Persists every failed attempt so status queries can see retries in
/// progress.
struct AttemptRecorder<'a, S: EventStore> {
    service: &'a ReorderService<S>,
    instance_id: &'a InstanceId,
    step: Step,
}

#[async_trait]
impl<'a, S: EventStore> RetryObserver for AttemptRecorder<'a, S> {
    async fn attempt_failed(&self, attempt: u32, error: &ActivityError, retry_in: Option<Duration>) {
        let retry_in_ms = retry_in.map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));

        match retry_in_ms {
            Some(delay_ms) => {
                metrics::counter!("reorder_step_retries_total", "step" => self.step.as_str())
                    .increment(1);
                tracing::warn!(
                    step = %self.step,
                    attempt,
                    delay_ms,
                    error = %error,
                    "step attempt failed, retrying"
                );
            }
            None => {
                tracing::warn!(
                    step = %self.step,
                    attempt,
                    error = %error,
                    retryable = error.is_retryable(),
                    "step attempt failed, giving up"
                );
            }
        }

        let message = error.to_string();
        if let Err(e) = self
            .service
            .record_attempt_failure(self.instance_id, self.step, attempt, &message, retry_in_ms)
            .await
        {
            tracing::warn!(error = %e, "failed to record step attempt");
        }
    }
}

/// True for errors a command gets when a concurrent run changed the instance
/// after it was loaded.
fn lost_race(error: &SagaError) -> bool {
    matches!(
        error,
        SagaError::Domain(
            DomainError::Reorder(_)
                | DomainError::EventStore(EventStoreError::ConcurrencyConflict { .. })
        )
    )
}

fn conclude(instance_id: &InstanceId, instance: &ReorderInstance) -> Result<ReorderOutcome, SagaError> {
    if instance.state() == ReorderState::Failed {
        let step = instance
            .step_results()
            .iter()
            .find(|(_, result)| matches!(result.outcome, StepOutcome::Failed { .. }))
            .map(|(step, _)| *step)
            .or_else(|| instance.next_pending_step())
            .unwrap_or(Step::PlaceOrder);
        return Err(SagaError::StepFailed {
            instance_id: instance_id.clone(),
            step,
            reason: instance.failure_reason().unwrap_or("unknown").to_string(),
        });
    }
    Ok(ReorderOutcome::from_instance(instance_id, instance))
}

fn observe_terminal(instance_id: &InstanceId, instance: &ReorderInstance) {
    let state = instance.state();
    metrics::counter!("reorder_instances_terminal_total", "state" => state.as_str()).increment(1);

    if let (Some(created), Some(finished)) = (instance.created_at(), instance.completed_at()) {
        let seconds = (finished - created).num_milliseconds() as f64 / 1000.0;
        metrics::histogram!("reorder_duration_seconds").record(seconds);
    }

    match state {
        ReorderState::Completed => tracing::info!(
            %instance_id,
            order_id = instance.order_id().unwrap_or_default(),
            metrics_published = instance.metrics_published(),
            "reorder completed"
        ),
        ReorderState::Failed => tracing::error!(
            %instance_id,
            reason = instance.failure_reason().unwrap_or_default(),
            "reorder failed"
        ),
        _ => tracing::info!(
            %instance_id,
            state = %state,
            reason = instance.failure_reason().unwrap_or_default(),
            "reorder finished"
        ),
    }
}
