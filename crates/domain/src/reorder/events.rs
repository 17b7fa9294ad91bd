//! Reorder instance domain events.

use chrono::{DateTime, Utc};
use common::InstanceId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{ReorderRequest, ReorderState, Step, StepResult};

/// Events that can occur on a reorder instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ReorderEvent {
    /// Instance was accepted and is waiting for a worker.
    InstanceCreated(InstanceCreatedData),

    /// A worker began executing a step.
    StepStarted(StepStartedData),

    /// One attempt of a step failed and may be retried.
    StepAttemptFailed(StepAttemptFailedData),

    /// A step's final outcome was recorded.
    StepRecorded(StepRecordedData),

    /// A caller asked for the instance to be cancelled.
    CancellationRequested(CancellationRequestedData),

    /// The instance reached a terminal state.
    InstanceFinished(InstanceFinishedData),
}

impl DomainEvent for ReorderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReorderEvent::InstanceCreated(_) => "InstanceCreated",
            ReorderEvent::StepStarted(_) => "StepStarted",
            ReorderEvent::StepAttemptFailed(_) => "StepAttemptFailed",
            ReorderEvent::StepRecorded(_) => "StepRecorded",
            ReorderEvent::CancellationRequested(_) => "CancellationRequested",
            ReorderEvent::InstanceFinished(_) => "InstanceFinished",
        }
    }
}

/// Data for InstanceCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceCreatedData {
    pub instance_id: InstanceId,
    pub request: ReorderRequest,

    /// Caller-supplied idempotency key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Data for StepStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStartedData {
    pub step: Step,
    pub started_at: DateTime<Utc>,
}

/// Data for StepAttemptFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAttemptFailedData {
    pub step: Step,

    /// 1-based attempt number that failed.
    pub attempt: u32,
    pub error: String,

    /// Delay before the next attempt, or None if the step gives up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

/// Data for StepRecorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecordedData {
    pub step: Step,
    pub result: StepResult,
}

/// Data for CancellationRequested event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRequestedData {
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Data for InstanceFinished event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceFinishedData {
    pub state: ReorderState,
    pub finished_at: DateTime<Utc>,

    /// Why the instance did not complete, for failed or cancelled instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReorderEvent {
    pub fn instance_created(
        instance_id: InstanceId,
        request: ReorderRequest,
        idempotency_key: Option<String>,
    ) -> Self {
        ReorderEvent::InstanceCreated(InstanceCreatedData {
            instance_id,
            request,
            idempotency_key,
            created_at: Utc::now(),
        })
    }

    pub fn step_started(step: Step) -> Self {
        ReorderEvent::StepStarted(StepStartedData {
            step,
            started_at: Utc::now(),
        })
    }

    pub fn step_attempt_failed(
        step: Step,
        attempt: u32,
        error: impl Into<String>,
        retry_in_ms: Option<u64>,
    ) -> Self {
        ReorderEvent::StepAttemptFailed(StepAttemptFailedData {
            step,
            attempt,
            error: error.into(),
            retry_in_ms,
        })
    }

    pub fn step_recorded(step: Step, result: StepResult) -> Self {
        ReorderEvent::StepRecorded(StepRecordedData { step, result })
    }

    pub fn cancellation_requested(reason: Option<String>) -> Self {
        ReorderEvent::CancellationRequested(CancellationRequestedData {
            reason,
            requested_at: Utc::now(),
        })
    }

    pub fn instance_finished(state: ReorderState, reason: Option<String>) -> Self {
        ReorderEvent::InstanceFinished(InstanceFinishedData {
            state,
            finished_at: Utc::now(),
            reason,
        })
    }
}
