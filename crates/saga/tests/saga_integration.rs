//! Integration tests for the reorder saga.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::InstanceId;
use domain::{
    Availability, PlacedOrder, ReorderRequest, ReorderService, ReorderState, Step, StepOutcome,
    StepOutput, StepResult,
};
use event_store::{
    AppendOptions, EventEnvelope, EventStore, EventStoreError, InMemoryEventStore, Version,
};
use saga::{
    ActivityError, ActivityExecutor, ActivityTimeouts, Collaborators, DispatcherConfig,
    InMemoryMetricsSink, InMemoryNotificationChannel, InMemoryRuleStore, InMemorySupplierClient,
    RecordingSleeper, ReorderCoordinator, ReorderRegistry, ReorderRule, RetryPolicy, SagaError,
    Sleeper,
};
use tokio::sync::Notify;

struct TestHarness<S: EventStore + 'static = InMemoryEventStore> {
    service: Arc<ReorderService<S>>,
    coordinator: Arc<ReorderCoordinator<S>>,
    rules: InMemoryRuleStore,
    supplier: InMemorySupplierClient,
    metrics: InMemoryMetricsSink,
    notifier: InMemoryNotificationChannel,
    sleeper: RecordingSleeper,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_store(InMemoryEventStore::new())
    }
}

impl<S: EventStore + 'static> TestHarness<S> {
    fn with_store(store: S) -> Self {
        let sleeper = RecordingSleeper::new();
        Self::build(store, sleeper.clone(), Arc::new(sleeper))
    }

    /// `recording` is exposed as `sleeper`; `backoff` is what the
    /// coordinator actually waits on.
    fn build(store: S, recording: RecordingSleeper, backoff: Arc<dyn Sleeper>) -> Self {
        let service = Arc::new(ReorderService::new(store));
        let rules = InMemoryRuleStore::approving_unmatched();
        let supplier = InMemorySupplierClient::new();
        let metrics = InMemoryMetricsSink::new();
        let notifier = InMemoryNotificationChannel::new();

        let collaborators = Collaborators {
            rules: Arc::new(rules.clone()),
            supplier: Arc::new(supplier.clone()),
            metrics: Arc::new(metrics.clone()),
            notifier: Arc::new(notifier.clone()),
        };
        let coordinator = ReorderCoordinator::new(
            Arc::clone(&service),
            ActivityExecutor::new(collaborators, ActivityTimeouts::default()),
            RetryPolicy::default(),
        )
        .with_sleeper(backoff);

        Self {
            service,
            coordinator: Arc::new(coordinator),
            rules,
            supplier,
            metrics,
            notifier,
            sleeper: recording,
        }
    }

    async fn create(&self, id: &str) -> InstanceId {
        let id = InstanceId::new(id);
        self.service
            .create_instance(id.clone(), request(), None)
            .await
            .unwrap();
        id
    }

    fn registry(&self) -> ReorderRegistry<S> {
        self.registry_with(DispatcherConfig {
            worker_count: 2,
            queue_capacity: 16,
            ..DispatcherConfig::default()
        })
    }

    fn registry_with(&self, config: DispatcherConfig) -> ReorderRegistry<S> {
        ReorderRegistry::start(Arc::clone(&self.coordinator), config)
    }

    async fn count_events(&self, id: &InstanceId, event_type: &str) -> usize {
        self.service
            .handler()
            .store()
            .get_events(id)
            .await
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

/// Event store that rejects appends recording one step's result while it
/// has failures left.
struct FlakyStore {
    inner: InMemoryEventStore,
    step: Step,
    failures: AtomicU32,
}

impl FlakyStore {
    fn failing_records_of(step: Step, failures: u32) -> Self {
        Self {
            inner: InMemoryEventStore::new(),
            step,
            failures: AtomicU32::new(failures),
        }
    }

    fn records_step(&self, events: &[EventEnvelope]) -> bool {
        events.iter().any(|e| {
            e.event_type == "StepRecorded" && e.payload["data"]["step"] == self.step.as_str()
        })
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        options: AppendOptions,
    ) -> event_store::Result<Version> {
        if self.records_step(&events)
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(EventStoreError::InvalidAppend(
                "storage temporarily unavailable".to_string(),
            ));
        }
        self.inner.append(events, options).await
    }

    async fn get_events(&self, stream_id: &InstanceId) -> event_store::Result<Vec<EventEnvelope>> {
        self.inner.get_events(stream_id).await
    }

    async fn get_stream_version(
        &self,
        stream_id: &InstanceId,
    ) -> event_store::Result<Option<Version>> {
        self.inner.get_stream_version(stream_id).await
    }

    async fn list_streams(&self, stream_type: &str) -> event_store::Result<Vec<InstanceId>> {
        self.inner.list_streams(stream_type).await
    }

    async fn find_stream_by_metadata(
        &self,
        key: &str,
        value: &str,
    ) -> event_store::Result<Option<InstanceId>> {
        self.inner.find_stream_by_metadata(key, value).await
    }
}

/// Event store shared with another writer that creates the same stream
/// first the next time a new stream is appended.
struct ContendedStore {
    inner: InMemoryEventStore,
    contended: AtomicU32,
}

impl ContendedStore {
    fn new() -> Self {
        Self {
            inner: InMemoryEventStore::new(),
            contended: AtomicU32::new(1),
        }
    }
}

#[async_trait]
impl EventStore for ContendedStore {
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        options: AppendOptions,
    ) -> event_store::Result<Version> {
        if options.expected_version == Some(Version::initial())
            && self
                .contended
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            self.inner.append(events.clone(), options.clone()).await?;
        }
        self.inner.append(events, options).await
    }

    async fn get_events(&self, stream_id: &InstanceId) -> event_store::Result<Vec<EventEnvelope>> {
        self.inner.get_events(stream_id).await
    }

    async fn get_stream_version(
        &self,
        stream_id: &InstanceId,
    ) -> event_store::Result<Option<Version>> {
        self.inner.get_stream_version(stream_id).await
    }

    async fn list_streams(&self, stream_type: &str) -> event_store::Result<Vec<InstanceId>> {
        self.inner.list_streams(stream_type).await
    }

    async fn find_stream_by_metadata(
        &self,
        key: &str,
        value: &str,
    ) -> event_store::Result<Option<InstanceId>> {
        self.inner.find_stream_by_metadata(key, value).await
    }
}

/// Sleeper that parks every backoff wait until the test releases it.
#[derive(Clone, Default)]
struct GateSleeper {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Sleeper for GateSleeper {
    async fn sleep(&self, _duration: Duration) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

fn request() -> ReorderRequest {
    ReorderRequest::new("S1", "P1", 50, "SUP1", 120.0).unwrap()
}

fn recorded_steps(instance: &domain::ReorderInstance) -> Vec<Step> {
    instance.step_results().iter().map(|(s, _)| *s).collect()
}

async fn wait_terminal<S: EventStore + 'static>(
    registry: &ReorderRegistry<S>,
    id: &InstanceId,
) -> ReorderState {
    for _ in 0..500 {
        let status = registry.status(id).await.unwrap();
        if status.state.is_terminal() {
            return status.state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("instance {id} did not finish");
}

#[tokio::test]
async fn test_happy_path_completes_with_order_id() {
    let h = TestHarness::new();
    h.supplier.push_order_id("ORDER-42");
    let id = h.create("reorder-20250110093000").await;

    let outcome = h.coordinator.run(&id).await.unwrap();

    assert_eq!(outcome.state, ReorderState::Completed);
    assert_eq!(outcome.order_id.as_deref(), Some("ORDER-42"));
    assert!(outcome.metrics_published);

    let instance = h.service.require(&id).await.unwrap();
    assert_eq!(recorded_steps(&instance), Step::ALL);
    assert!(instance.completed_at().is_some());
    assert_eq!(h.supplier.place_calls(), 1);
    assert_eq!(h.metrics.published().len(), 1);
    assert_eq!(h.notifier.sent()[0].order_id, "ORDER-42");
    assert!(h.sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_rejected_request_runs_no_further_steps() {
    let h = TestHarness::new();
    h.rules.set_approve_unmatched(false);
    let id = h.create("reorder-1").await;

    let outcome = h.coordinator.run(&id).await.unwrap();

    assert_eq!(outcome.state, ReorderState::Rejected);
    assert!(outcome.order_id.is_none());
    let instance = h.service.require(&id).await.unwrap();
    assert_eq!(recorded_steps(&instance), vec![Step::Validate]);
    assert_eq!(h.rules.validate_calls(), 1);
    assert_eq!(h.supplier.check_calls(), 0);
    assert_eq!(h.supplier.place_calls(), 0);
    assert_eq!(h.metrics.calls(), 0);
    assert_eq!(h.notifier.calls(), 0);
}

#[tokio::test]
async fn test_rule_thresholds_drive_validation() {
    let h = TestHarness::new();
    h.rules.set_approve_unmatched(false);
    h.rules
        .upsert(ReorderRule {
            store_id: domain::StoreId::new("S1"),
            product_id: domain::ProductId::new("P1"),
            min_quantity: 10,
            max_quantity: 100,
            min_predicted_demand: 100.0,
        })
        .unwrap();
    let id = h.create("reorder-1").await;

    let outcome = h.coordinator.run(&id).await.unwrap();
    assert_eq!(outcome.state, ReorderState::Completed);
}

#[tokio::test]
async fn test_unavailable_supplier_never_places_order() {
    let h = TestHarness::new();
    h.supplier.set_status("SUP1", "P1", "unavailable");
    let id = h.create("reorder-1").await;

    let outcome = h.coordinator.run(&id).await.unwrap();

    assert_eq!(outcome.state, ReorderState::SupplierUnavailable);
    assert!(outcome.order_id.is_none());
    assert_eq!(h.supplier.place_calls(), 0);
    let instance = h.service.require(&id).await.unwrap();
    assert_eq!(
        recorded_steps(&instance),
        vec![Step::Validate, Step::CheckSupplier]
    );
}

#[tokio::test]
async fn test_exhausted_placement_fails_instance() {
    let h = TestHarness::new();
    h.supplier
        .fail_place_always(ActivityError::transient("supplier gateway timeout"));
    let id = h.create("reorder-1").await;

    let err = h.coordinator.run(&id).await.unwrap_err();

    assert!(matches!(
        err,
        SagaError::StepFailed {
            step: Step::PlaceOrder,
            ..
        }
    ));
    assert_eq!(h.supplier.place_calls(), 3);
    assert_eq!(
        h.sleeper.delays(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );

    let instance = h.service.require(&id).await.unwrap();
    assert_eq!(instance.state(), ReorderState::Failed);
    assert!(instance.order_id().is_none());
    assert_eq!(instance.failed_attempts(), 3);
    assert_eq!(h.metrics.calls(), 0);
    assert_eq!(h.notifier.calls(), 0);
}

#[tokio::test]
async fn test_permanent_error_skips_retries() {
    let h = TestHarness::new();
    h.supplier
        .fail_place_always(ActivityError::permanent("unknown product"));
    let id = h.create("reorder-1").await;

    assert!(h.coordinator.run(&id).await.is_err());
    assert_eq!(h.supplier.place_calls(), 1);
    assert!(h.sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_transient_failure_recovers_within_budget() {
    let h = TestHarness::new();
    h.supplier
        .fail_check_next(2, ActivityError::transient("connection reset"));
    let id = h.create("reorder-1").await;

    let outcome = h.coordinator.run(&id).await.unwrap();

    assert_eq!(outcome.state, ReorderState::Completed);
    assert_eq!(h.supplier.check_calls(), 3);
    let instance = h.service.require(&id).await.unwrap();
    assert_eq!(instance.result_for(Step::CheckSupplier).unwrap().attempts, 3);
}

#[tokio::test]
async fn test_validation_error_is_fatal() {
    let h = TestHarness::new();
    h.rules
        .fail_always(ActivityError::transient("rule store unreachable"));
    let id = h.create("reorder-1").await;

    let err = h.coordinator.run(&id).await.unwrap_err();

    assert!(matches!(
        err,
        SagaError::StepFailed {
            step: Step::Validate,
            ..
        }
    ));
    assert_eq!(h.supplier.check_calls(), 0);
}

#[tokio::test]
async fn test_metrics_failure_does_not_fail_instance() {
    let h = TestHarness::new();
    h.supplier.push_order_id("ORDER-42");
    h.metrics.fail_always(ActivityError::transient("sink down"));
    let id = h.create("reorder-1").await;

    let outcome = h.coordinator.run(&id).await.unwrap();

    assert_eq!(outcome.state, ReorderState::Completed);
    assert_eq!(outcome.order_id.as_deref(), Some("ORDER-42"));
    assert!(!outcome.metrics_published);
    assert_eq!(h.metrics.calls(), 3);
    assert_eq!(h.notifier.sent().len(), 1);

    let instance = h.service.require(&id).await.unwrap();
    let metrics = instance.result_for(Step::PublishMetrics).unwrap();
    assert!(matches!(metrics.outcome, StepOutcome::Warning { .. }));
    assert_eq!(metrics.attempts, 3);
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_instance() {
    let h = TestHarness::new();
    h.notifier
        .fail_always(ActivityError::permanent("no recipients configured"));
    let id = h.create("reorder-1").await;

    let outcome = h.coordinator.run(&id).await.unwrap();

    assert_eq!(outcome.state, ReorderState::Completed);
    assert!(outcome.metrics_published);
    assert_eq!(h.notifier.calls(), 1);
    let instance = h.service.require(&id).await.unwrap();
    assert!(matches!(
        instance.result_for(Step::Notify).unwrap().outcome,
        StepOutcome::Warning { .. }
    ));
}

#[tokio::test]
async fn test_rerun_never_places_order_twice() {
    let h = TestHarness::new();
    let id = h.create("reorder-1").await;

    let first = h.coordinator.run(&id).await.unwrap();
    let second = h.coordinator.run(&id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.supplier.place_calls(), 1);
    assert_eq!(h.rules.validate_calls(), 1);
}

#[tokio::test]
async fn test_resume_after_recorded_placement_skips_supplier() {
    let h = TestHarness::new();
    let id = h.create("reorder-1").await;

    // A previous run recorded the first three steps, then crashed.
    let recorded = [
        (Step::Validate, StepOutput::Validated { approved: true }),
        (
            Step::CheckSupplier,
            StepOutput::SupplierChecked {
                availability: Availability::Available,
            },
        ),
        (
            Step::PlaceOrder,
            StepOutput::OrderPlaced(PlacedOrder::new("ORDER-7")),
        ),
    ];
    for (step, output) in recorded {
        h.service.begin_step(&id, step).await.unwrap();
        h.service
            .record_step(&id, step, StepResult::succeeded(output, 1))
            .await
            .unwrap();
    }

    let outcome = h.coordinator.run(&id).await.unwrap();

    assert_eq!(outcome.state, ReorderState::Completed);
    assert_eq!(outcome.order_id.as_deref(), Some("ORDER-7"));
    assert_eq!(h.rules.validate_calls(), 0);
    assert_eq!(h.supplier.check_calls(), 0);
    assert_eq!(h.supplier.place_calls(), 0);
    assert_eq!(h.metrics.published()[0].order_id, "ORDER-7");
}

#[tokio::test]
async fn test_resume_reruns_started_but_unrecorded_step() {
    let h = TestHarness::new();
    let id = h.create("reorder-1").await;

    h.service.begin_step(&id, Step::Validate).await.unwrap();

    let outcome = h.coordinator.run(&id).await.unwrap();
    assert_eq!(outcome.state, ReorderState::Completed);
    assert_eq!(h.rules.validate_calls(), 1);
}

#[tokio::test]
async fn test_resume_finishes_recorded_rejection() {
    let h = TestHarness::new();
    let id = h.create("reorder-1").await;

    h.service.begin_step(&id, Step::Validate).await.unwrap();
    h.service
        .record_step(
            &id,
            Step::Validate,
            StepResult::succeeded(StepOutput::Validated { approved: false }, 1),
        )
        .await
        .unwrap();

    let outcome = h.coordinator.run(&id).await.unwrap();
    assert_eq!(outcome.state, ReorderState::Rejected);
    assert_eq!(h.supplier.check_calls(), 0);
}

#[tokio::test]
async fn test_lost_supplier_response_creates_single_order() {
    let h = TestHarness::new();
    h.supplier.lose_next_responses(1);
    let id = h.create("reorder-1").await;

    let outcome = h.coordinator.run(&id).await.unwrap();

    assert_eq!(outcome.state, ReorderState::Completed);
    assert_eq!(h.supplier.place_calls(), 2);
    assert_eq!(h.supplier.order_count(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = TestHarness::new();
    let id = h.create("reorder-1").await;

    h.service
        .request_cancellation(&id, Some("manual override".to_string()))
        .await
        .unwrap();
    let outcome = h.coordinator.run(&id).await.unwrap();

    assert_eq!(outcome.state, ReorderState::Cancelled);
    assert_eq!(h.rules.validate_calls(), 0);
    assert_eq!(h.supplier.place_calls(), 0);
}

#[tokio::test]
async fn test_unknown_instance() {
    let h = TestHarness::new();
    let err = h
        .coordinator
        .run(&InstanceId::new("reorder-missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::InstanceNotFound(_)));
}

#[tokio::test]
async fn test_registry_submit_and_status() {
    let h = TestHarness::new();
    h.supplier.push_order_id("ORDER-42");
    let registry = h.registry();

    let submission = registry.submit(request(), None).await.unwrap();
    assert!(submission.created);
    assert!(submission.instance_id.as_str().starts_with("reorder-"));

    let state = wait_terminal(&registry, &submission.instance_id).await;
    assert_eq!(state, ReorderState::Completed);

    let status = registry.status(&submission.instance_id).await.unwrap();
    assert_eq!(status.order_id.as_deref(), Some("ORDER-42"));
    assert_eq!(status.step_results.len(), 5);
    assert_eq!(status.step_results[0].step, Step::Validate);

    registry.dispatcher().shutdown().await;
}

#[tokio::test]
async fn test_registry_allocates_distinct_ids() {
    let h = TestHarness::new();
    let registry = h.registry();

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(registry.submit(request(), None).await.unwrap().instance_id);
    }
    let unique: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 5);

    for id in &ids {
        wait_terminal(&registry, id).await;
    }
    assert_eq!(h.supplier.order_count(), 5);
    assert_eq!(registry.list().await.unwrap().len(), 5);

    registry.dispatcher().shutdown().await;
}

#[tokio::test]
async fn test_registry_idempotency_key() {
    let h = TestHarness::new();
    let registry = h.registry();
    let key = common::IdempotencyKey::new("client-req-1");

    let first = registry.submit(request(), Some(key.clone())).await.unwrap();
    let again = registry.submit(request(), Some(key.clone())).await.unwrap();
    assert!(first.created);
    assert!(!again.created);
    assert_eq!(first.instance_id, again.instance_id);

    let different = ReorderRequest::new("S1", "P1", 99, "SUP1", 120.0).unwrap();
    let err = registry.submit(different, Some(key)).await.unwrap_err();
    assert!(matches!(err, SagaError::IdempotencyConflict { .. }));

    wait_terminal(&registry, &first.instance_id).await;
    assert_eq!(h.supplier.place_calls(), 1);
    assert_eq!(registry.list().await.unwrap().len(), 1);

    registry.dispatcher().shutdown().await;
}

#[tokio::test]
async fn test_registry_rejects_malformed_request() {
    let h = TestHarness::new();
    let registry = h.registry();

    let mut bad = request();
    bad.quantity = 0;
    let err = registry.submit(bad, None).await.unwrap_err();
    assert!(matches!(err, SagaError::InvalidRequest(_)));

    registry.dispatcher().shutdown().await;
}

#[tokio::test]
async fn test_registry_unknown_instance_is_not_pending() {
    let h = TestHarness::new();
    let registry = h.registry();

    let err = registry
        .status(&InstanceId::new("reorder-19700101000000"))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::InstanceNotFound(_)));

    registry.dispatcher().shutdown().await;
}

#[tokio::test]
async fn test_registry_cancel_after_completion_is_refused() {
    let h = TestHarness::new();
    let registry = h.registry();

    let submission = registry.submit(request(), None).await.unwrap();
    wait_terminal(&registry, &submission.instance_id).await;

    let err = registry
        .cancel(&submission.instance_id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SagaError::CancellationRefused {
            state: ReorderState::Completed,
            ..
        }
    ));

    registry.dispatcher().shutdown().await;
}

#[tokio::test]
async fn test_recover_resumes_unfinished_instances() {
    let h = TestHarness::new();
    let pending = h.create("reorder-1").await;
    let mid_flight = h.create("reorder-2").await;
    h.service.begin_step(&mid_flight, Step::Validate).await.unwrap();

    let registry = h.registry();
    let resumed = registry.recover().await.unwrap();
    assert_eq!(resumed, 2);

    assert_eq!(
        wait_terminal(&registry, &pending).await,
        ReorderState::Completed
    );
    assert_eq!(
        wait_terminal(&registry, &mid_flight).await,
        ReorderState::Completed
    );

    // Nothing left to resume.
    assert_eq!(registry.recover().await.unwrap(), 0);

    registry.dispatcher().shutdown().await;
}

#[tokio::test]
async fn test_dispatch_after_shutdown_is_refused() {
    let h = TestHarness::new();
    let registry = h.registry();
    registry.dispatcher().shutdown().await;

    let err = registry.submit(request(), None).await.unwrap_err();
    assert!(matches!(err, SagaError::DispatcherClosed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_aborted_run_is_queued_again() {
    let h = TestHarness::with_store(FlakyStore::failing_records_of(Step::PlaceOrder, 1));
    h.supplier.push_order_id("ORDER-7");
    let registry = h.registry();

    let submission = registry.submit(request(), None).await.unwrap();
    let id = submission.instance_id;

    assert_eq!(wait_terminal(&registry, &id).await, ReorderState::Completed);
    assert_eq!(h.supplier.order_count(), 1);
    assert_eq!(
        h.service.require(&id).await.unwrap().order_id(),
        Some("ORDER-7")
    );
    // Backoff before the second run.
    assert_eq!(h.sleeper.delays(), vec![Duration::from_secs(1)]);

    registry.dispatcher().shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repeatedly_aborted_run_fails_instance() {
    let h = TestHarness::with_store(FlakyStore::failing_records_of(Step::PlaceOrder, u32::MAX));
    let registry = h.registry_with(DispatcherConfig {
        worker_count: 1,
        queue_capacity: 16,
        max_aborted_runs: 2,
    });

    let submission = registry.submit(request(), None).await.unwrap();
    let id = submission.instance_id;

    assert_eq!(wait_terminal(&registry, &id).await, ReorderState::Failed);
    assert_eq!(h.supplier.order_count(), 1);
    assert_eq!(h.supplier.place_calls(), 3);

    let status = registry.status(&id).await.unwrap();
    assert!(status.failure_reason.unwrap().contains("aborted"));
    assert!(status.order_id.is_none());

    registry.dispatcher().shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_place_one_order() {
    let h = TestHarness::new();
    let id = h.create("reorder-1").await;

    let runs: Vec<_> = (0..2)
        .map(|_| {
            let coordinator = Arc::clone(&h.coordinator);
            let id = id.clone();
            tokio::spawn(async move { coordinator.run(&id).await })
        })
        .collect();

    for run in runs {
        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.state, ReorderState::Completed);
    }
    assert_eq!(h.supplier.order_count(), 1);
    assert_eq!(h.count_events(&id, "InstanceFinished").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repeated_dispatch_places_one_order() {
    let h = TestHarness::new();
    let registry = h.registry();

    let submission = registry.submit(request(), None).await.unwrap();
    let id = submission.instance_id;
    for _ in 0..3 {
        registry.dispatcher().dispatch(id.clone()).await.unwrap();
    }

    assert_eq!(wait_terminal(&registry, &id).await, ReorderState::Completed);
    assert_eq!(h.supplier.order_count(), 1);
    assert_eq!(h.count_events(&id, "InstanceFinished").await, 1);

    registry.dispatcher().shutdown().await;
}

#[tokio::test]
async fn test_status_answers_during_backoff() {
    let gate = GateSleeper::default();
    let h = TestHarness::build(
        InMemoryEventStore::new(),
        RecordingSleeper::new(),
        Arc::new(gate.clone()),
    );
    h.supplier
        .fail_place_next(1, ActivityError::transient("supplier timeout"));
    let id = h.create("reorder-1").await;
    let registry = h.registry();

    let run = {
        let coordinator = Arc::clone(&h.coordinator);
        let id = id.clone();
        tokio::spawn(async move { coordinator.run(&id).await })
    };
    gate.entered.notified().await;

    let status = registry.status(&id).await.unwrap();
    assert_eq!(status.state, ReorderState::Placing);
    assert_eq!(status.failed_attempts, 1);
    assert!(status.order_id.is_none());

    gate.release.notify_one();
    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome.state, ReorderState::Completed);
    assert_eq!(h.supplier.place_calls(), 2);

    registry.dispatcher().shutdown().await;
}

#[tokio::test]
async fn test_registry_moves_past_id_taken_by_another_writer() {
    let h = TestHarness::with_store(ContendedStore::new());
    let registry = h.registry();

    let submission = registry.submit(request(), None).await.unwrap();
    assert!(submission.created);
    assert_eq!(
        wait_terminal(&registry, &submission.instance_id).await,
        ReorderState::Completed
    );

    let ids = h.service.list_instance_ids().await.unwrap();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], submission.instance_id);
    assert_eq!(ids[1], submission.instance_id);

    registry.dispatcher().shutdown().await;
}
