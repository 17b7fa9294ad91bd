//! Reorder trigger, status and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{IdempotencyKey, InstanceId};
use domain::ReorderRequest;
use event_store::EventStore;
use saga::{InMemoryRuleStore, InstanceStatus, InstanceSummary, ReorderRegistry};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Header carrying a caller-chosen deduplication key for `POST /reorder`.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub registry: ReorderRegistry<S>,

    /// The rule store consulted by the validate step.
    pub rules: InMemoryRuleStore,
}

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub instance_id: InstanceId,
    pub created: bool,
}

// -- Handlers --

/// POST /reorder: accepts a reorder request and queues it for execution.
#[tracing::instrument(skip_all)]
pub async fn submit<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(request): Json<ReorderRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let idempotency_key = idempotency_key(&headers)?;
    let submission = state.registry.submit(request, idempotency_key).await?;
    if !submission.created {
        metrics::counter!("reorder_idempotent_replays_total").increment(1);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            instance_id: submission.instance_id,
            created: submission.created,
        }),
    ))
}

/// GET /reorder: lists all reorder instances.
pub async fn list<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<InstanceSummary>>, ApiError> {
    Ok(Json(state.registry.list().await?))
}

/// GET /reorder/{instance_id}: current state and recorded step results.
#[tracing::instrument(skip_all, fields(instance_id = %instance_id))]
pub async fn status<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(instance_id): Path<String>,
) -> Result<Json<InstanceStatus>, ApiError> {
    let instance_id = InstanceId::new(instance_id);
    Ok(Json(state.registry.status(&instance_id).await?))
}

/// POST /reorder/{instance_id}/cancel: requests cancellation.
///
/// The body is optional; when present it may carry a `reason`.
#[tracing::instrument(skip_all, fields(instance_id = %instance_id))]
pub async fn cancel<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Result<Json<InstanceStatus>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CancelRequest::default()
    } else {
        serde_json::from_slice::<CancelRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid cancel request: {e}")))?
    };

    let instance_id = InstanceId::new(instance_id);
    let status = state
        .registry
        .cancel(&instance_id, request.reason)
        .await?;
    Ok(Json(status))
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<IdempotencyKey>, ApiError> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("Idempotency-Key must be visible ASCII".to_string()))?
        .trim();
    if key.is_empty() {
        return Err(ApiError::BadRequest(
            "Idempotency-Key must not be empty".to_string(),
        ));
    }
    Ok(Some(IdempotencyKey::new(key)))
}
