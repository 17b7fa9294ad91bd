//! Reorder instance state machine.

use serde::{Deserialize, Serialize};

/// The state of a reorder instance in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Validating ──► CheckingSupplier ──► Placing ──► PublishingMetrics ──► Notifying ──► Completed
///                 │                 │                │
///                 ├──► Rejected     ├──► SupplierUnavailable
///                 │                 │                │
///                 └─────────────────┴────────────────┴──► Failed
///
/// Pending / Validating / CheckingSupplier ──► Cancelled
/// ```
///
/// Transitions only move forward; re-entering the current step is allowed so
/// a resumed instance can retry the step it crashed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReorderState {
    /// Created and waiting for a worker.
    #[default]
    Pending,

    /// Checking the request against reorder rules.
    Validating,

    /// Asking the supplier whether it can fulfil the order.
    CheckingSupplier,

    /// Submitting the order to the supplier.
    Placing,

    /// Recording the reorder for reporting.
    PublishingMetrics,

    /// Sending the completion notification.
    Notifying,

    /// Order placed (terminal state).
    Completed,

    /// Reorder rules declined the request (terminal state).
    Rejected,

    /// Supplier could not take the order (terminal state).
    SupplierUnavailable,

    /// A fatal step failed (terminal state).
    Failed,

    /// Cancelled before order placement (terminal state).
    Cancelled,
}

impl ReorderState {
    /// Position along the forward path. Terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            ReorderState::Pending => 0,
            ReorderState::Validating => 1,
            ReorderState::CheckingSupplier => 2,
            ReorderState::Placing => 3,
            ReorderState::PublishingMetrics => 4,
            ReorderState::Notifying => 5,
            ReorderState::Completed
            | ReorderState::Rejected
            | ReorderState::SupplierUnavailable
            | ReorderState::Failed
            | ReorderState::Cancelled => 6,
        }
    }

    /// Returns true if this is a terminal state (no further steps run).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReorderState::Completed
                | ReorderState::Rejected
                | ReorderState::SupplierUnavailable
                | ReorderState::Failed
                | ReorderState::Cancelled
        )
    }

    /// Returns true if the state machine may move from `self` to `next`.
    pub fn can_transition_to(&self, next: ReorderState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            ReorderState::Pending => false,
            ReorderState::Rejected => self.rank() <= ReorderState::Validating.rank(),
            ReorderState::SupplierUnavailable => {
                self.rank() <= ReorderState::CheckingSupplier.rank()
            }
            ReorderState::Cancelled => self.can_cancel(),
            ReorderState::Failed => true,
            _ => next.rank() >= self.rank(),
        }
    }

    /// Returns true if the instance can still be cancelled.
    ///
    /// Cancellation stops being possible once order placement has started,
    /// because the supplier order is an external side effect.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            ReorderState::Pending | ReorderState::Validating | ReorderState::CheckingSupplier
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReorderState::Pending => "Pending",
            ReorderState::Validating => "Validating",
            ReorderState::CheckingSupplier => "CheckingSupplier",
            ReorderState::Placing => "Placing",
            ReorderState::PublishingMetrics => "PublishingMetrics",
            ReorderState::Notifying => "Notifying",
            ReorderState::Completed => "Completed",
            ReorderState::Rejected => "Rejected",
            ReorderState::SupplierUnavailable => "SupplierUnavailable",
            ReorderState::Failed => "Failed",
            ReorderState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ReorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
