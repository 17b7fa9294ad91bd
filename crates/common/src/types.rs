use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed prefix of every generated instance ID.
pub const INSTANCE_ID_PREFIX: &str = "reorder";

/// Unique identifier for a reorder instance.
///
/// Generated IDs are human-traceable: the fixed prefix followed by the
/// UTC creation timestamp (`reorder-20250110093000`). When two instances
/// are created within the same second the registry appends a numeric
/// suffix (`reorder-20250110093000-2`).
///
/// The ID doubles as the event stream key and as the root of the
/// idempotency token handed to the supplier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wraps an existing instance ID string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the base ID for an instance created at `at`.
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(format!(
            "{INSTANCE_ID_PREFIX}-{}",
            at.format("%Y%m%d%H%M%S")
        ))
    }

    /// Returns a collision-resolved variant of this ID.
    ///
    /// `n` below 2 returns the ID unchanged.
    pub fn with_suffix(&self, n: u32) -> Self {
        if n < 2 {
            self.clone()
        } else {
            Self(format!("{}-{n}", self.0))
        }
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Caller-supplied key that makes an external call or a creation request
/// safe to repeat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Creates a key from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives the per-step token for an instance, e.g.
    /// `reorder-20250110093000:place_order`.
    pub fn for_step(instance_id: &InstanceId, step: &str) -> Self {
        Self(format!("{instance_id}:{step}"))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
