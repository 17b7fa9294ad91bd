//! Reorder rule management endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{ProductId, StoreId};
use event_store::EventStore;
use saga::ReorderRule;
use serde::Deserialize;

use super::reorder::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct RuleRequest {
    pub min_quantity: u32,
    pub max_quantity: u32,
    #[serde(default)]
    pub min_predicted_demand: f64,
}

/// GET /reorder-rules
pub async fn list<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<Vec<ReorderRule>> {
    Json(state.rules.list())
}

/// PUT /reorder-rules/{store_id}/{product_id}: creates or replaces a rule.
#[tracing::instrument(skip_all, fields(store_id = %store_id, product_id = %product_id))]
pub async fn upsert<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, product_id)): Path<(String, String)>,
    Json(body): Json<RuleRequest>,
) -> Result<Json<ReorderRule>, ApiError> {
    let rule = ReorderRule::new(
        StoreId::new(store_id),
        ProductId::new(product_id),
        body.min_quantity,
        body.max_quantity,
        body.min_predicted_demand,
    )?;
    state.rules.upsert(rule.clone())?;
    tracing::info!("reorder rule saved");
    Ok(Json(rule))
}

/// DELETE /reorder-rules/{store_id}/{product_id}
pub async fn remove<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, product_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let store_id = StoreId::new(store_id);
    let product_id = ProductId::new(product_id);
    match state.rules.remove(&store_id, &product_id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::NotFound(format!(
            "No reorder rule for {store_id}/{product_id}"
        ))),
    }
}
