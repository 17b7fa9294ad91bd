//! HTTP API server for the reorder orchestration engine.
//!
//! Provides REST endpoints to trigger, inspect and cancel reorder
//! instances and to manage reorder rules, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::ReorderService;
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    ActivityExecutor, Collaborators, InMemoryRuleStore, InMemorySupplierClient,
    LogNotificationChannel, MetricsSink, NotificationChannel, RecorderMetricsSink,
    ReorderCoordinator, ReorderRegistry, SupplierClient,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::reorder::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/reorder",
            post(routes::reorder::submit::<S>).get(routes::reorder::list::<S>),
        )
        .route("/reorder/{instance_id}", get(routes::reorder::status::<S>))
        .route(
            "/reorder/{instance_id}/cancel",
            post(routes::reorder::cancel::<S>),
        )
        .route("/reorder-rules", get(routes::rules::list::<S>))
        .route(
            "/reorder-rules/{store_id}/{product_id}",
            put(routes::rules::upsert::<S>).delete(routes::rules::remove::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the engine around `event_store` with the given collaborators and
/// starts its worker pool. Must be called inside a tokio runtime.
pub fn create_state<S: EventStore + 'static>(
    event_store: S,
    rules: InMemoryRuleStore,
    supplier: Arc<dyn SupplierClient>,
    metrics: Arc<dyn MetricsSink>,
    notifier: Arc<dyn NotificationChannel>,
    config: &Config,
) -> Arc<AppState<S>> {
    let collaborators = Collaborators {
        rules: Arc::new(rules.clone()),
        supplier,
        metrics,
        notifier,
    };

    let service = Arc::new(ReorderService::new(event_store));
    let executor = ActivityExecutor::new(collaborators, config.activity_timeouts());
    let coordinator = Arc::new(ReorderCoordinator::new(
        service,
        executor,
        config.retry_policy(),
    ));
    let registry = ReorderRegistry::start(coordinator, config.dispatcher_config());

    Arc::new(AppState { registry, rules })
}

/// Creates the default application state: in-memory rules and supplier,
/// Prometheus-backed metrics sink and log-based notifications.
pub fn create_default_state<S: EventStore + 'static>(
    event_store: S,
    config: &Config,
) -> Arc<AppState<S>> {
    let rules = InMemoryRuleStore::new();
    rules.set_approve_unmatched(config.approve_unmatched_rules);

    let supplier = InMemorySupplierClient::new();
    supplier.set_lead_time_days(config.supplier_lead_time_days);

    create_state(
        event_store,
        rules,
        Arc::new(supplier),
        Arc::new(RecorderMetricsSink),
        Arc::new(LogNotificationChannel),
        config,
    )
}
