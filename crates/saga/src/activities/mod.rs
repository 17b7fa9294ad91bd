//! Activity execution: one named unit of external work per saga step.

mod executor;

pub use executor::{
    ActivityContext, ActivityExecutor, ActivityTimeouts, Collaborators, placement_key,
};

use std::time::Duration;

use thiserror::Error;

/// Failure of a single activity call, classified for the retry policy.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActivityError {
    /// Temporary failure such as a dropped connection.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The call did not finish within its timeout.
    #[error("Activity '{activity}' timed out after {after:?}")]
    Timeout { activity: String, after: Duration },

    /// The call can never succeed, e.g. malformed input or a permanent
    /// rejection by the remote side.
    #[error("Permanent failure: {0}")]
    Permanent(String),
}

impl ActivityError {
    pub fn transient(message: impl Into<String>) -> Self {
        ActivityError::Transient(message.into())
    }

    pub fn timeout(activity: impl Into<String>, after: Duration) -> Self {
        ActivityError::Timeout {
            activity: activity.into(),
            after,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ActivityError::Permanent(message.into())
    }

    /// Transient failures and timeouts are retried; permanent ones are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ActivityError::Permanent(_))
    }
}
