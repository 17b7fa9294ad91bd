//! Reorder saga orchestration.
//!
//! This crate drives a reorder instance through five steps:
//! 1. Validate the request against reorder rules
//! 2. Check supplier availability
//! 3. Place the order with the supplier
//! 4. Publish metrics
//! 5. Notify
//!
//! A negative answer in step 1 or 2 ends the instance as `Rejected` or
//! `SupplierUnavailable`. An exhausted failure in steps 1 to 3 is fatal;
//! failures in steps 4 and 5 are recorded as warnings and the instance
//! still completes. Each step runs under a [`RetryPolicy`], and every
//! outcome is persisted so a restarted process resumes where it stopped.

pub mod activities;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod retry;
pub mod services;

pub use activities::{
    ActivityContext, ActivityError, ActivityExecutor, ActivityTimeouts, Collaborators,
    placement_key,
};
pub use coordinator::{ReorderCoordinator, ReorderOutcome};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::SagaError;
pub use registry::{InstanceStatus, InstanceSummary, ReorderRegistry, StepResultView, Submission};
pub use retry::{
    NoopObserver, RecordingSleeper, RetryObserver, RetryOutcome, RetryPolicy, Sleeper,
    TokioSleeper,
};
pub use services::{
    InMemoryMetricsSink, InMemoryNotificationChannel, InMemoryRuleStore, InMemorySupplierClient,
    LogNotificationChannel, MetricsSink, NotificationChannel, RecorderMetricsSink,
    ReorderPlacedEvent, ReorderRule, RuleError, RuleStore, SupplierClient,
};
