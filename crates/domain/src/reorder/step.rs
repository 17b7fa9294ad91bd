//! Saga steps and their recorded results.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ReorderState;

/// One step of the reorder saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Validate,
    CheckSupplier,
    PlaceOrder,
    PublishMetrics,
    Notify,
}

impl Step {
    /// All steps in the order the coordinator runs them.
    pub const ALL: [Step; 5] = [
        Step::Validate,
        Step::CheckSupplier,
        Step::PlaceOrder,
        Step::PublishMetrics,
        Step::Notify,
    ];

    /// Returns the step name as used in step results and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Validate => "validate",
            Step::CheckSupplier => "check_supplier",
            Step::PlaceOrder => "place_order",
            Step::PublishMetrics => "publish_metrics",
            Step::Notify => "notify",
        }
    }

    /// The instance state while this step is running.
    pub fn running_state(&self) -> ReorderState {
        match self {
            Step::Validate => ReorderState::Validating,
            Step::CheckSupplier => ReorderState::CheckingSupplier,
            Step::PlaceOrder => ReorderState::Placing,
            Step::PublishMetrics => ReorderState::PublishingMetrics,
            Step::Notify => ReorderState::Notifying,
        }
    }

    /// Whether an exhausted failure of this step fails the whole instance.
    ///
    /// Metrics and notification failures are downgraded to warnings.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Step::Validate | Step::CheckSupplier | Step::PlaceOrder)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Supplier availability as reported by the supplier client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Unavailable,
}

impl Availability {
    /// Interprets a raw supplier status. Anything but `"available"` counts
    /// as unavailable.
    pub fn from_status(status: &str) -> Self {
        if status.trim().eq_ignore_ascii_case("available") {
            Availability::Available
        } else {
            Availability::Unavailable
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// An order accepted by the supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_delivery: Option<NaiveDate>,
}

impl PlacedOrder {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            estimated_delivery: None,
        }
    }

    pub fn with_estimated_delivery(mut self, date: NaiveDate) -> Self {
        self.estimated_delivery = Some(date);
        self
    }
}

/// Success payload of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    Validated { approved: bool },
    SupplierChecked { availability: Availability },
    OrderPlaced(PlacedOrder),
    MetricsPublished,
    Notified,
}

/// Final outcome of a step after retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step produced a result.
    Succeeded { output: StepOutput },

    /// A non-fatal step exhausted its retries; the instance continues.
    Warning { error: String },

    /// A fatal step exhausted its retries or failed permanently.
    Failed { error: String },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }

    pub fn output(&self) -> Option<&StepOutput> {
        match self {
            StepOutcome::Succeeded { output } => Some(output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StepOutcome::Warning { error } | StepOutcome::Failed { error } => Some(error),
            StepOutcome::Succeeded { .. } => None,
        }
    }
}

/// The recorded result of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    #[serde(flatten)]
    pub outcome: StepOutcome,

    /// Number of attempts the step took, including the successful one.
    pub attempts: u32,

    pub recorded_at: DateTime<Utc>,
}

impl StepResult {
    pub fn succeeded(output: StepOutput, attempts: u32) -> Self {
        Self {
            outcome: StepOutcome::Succeeded { output },
            attempts,
            recorded_at: Utc::now(),
        }
    }

    pub fn warning(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            outcome: StepOutcome::Warning {
                error: error.into(),
            },
            attempts,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            outcome: StepOutcome::Failed {
                error: error.into(),
            },
            attempts,
            recorded_at: Utc::now(),
        }
    }
}
