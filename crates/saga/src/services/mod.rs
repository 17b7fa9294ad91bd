//! External collaborator traits and their in-memory implementations.
//!
//! Each collaborator is consumed by the activity executor only; the
//! coordinator never talks to them directly.

pub mod metrics;
pub mod notification;
pub mod rules;
pub mod supplier;

use chrono::{DateTime, NaiveDate, Utc};
use common::InstanceId;
use domain::{PlacedOrder, ProductId, ReorderRequest, StoreId, SupplierId};
use serde::{Deserialize, Serialize};

use crate::activities::ActivityError;

pub use metrics::{InMemoryMetricsSink, MetricsSink, RecorderMetricsSink};
pub use notification::{InMemoryNotificationChannel, LogNotificationChannel, NotificationChannel};
pub use rules::{InMemoryRuleStore, ReorderRule, RuleError, RuleStore};
pub use supplier::{InMemorySupplierClient, SupplierClient};

/// Published to the metrics sink and notification channel once an order is
/// placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorderPlacedEvent {
    pub instance_id: InstanceId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub supplier_id: SupplierId,
    pub quantity: u32,
    pub predicted_demand: f64,
    pub order_id: String,
    pub estimated_delivery: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

impl ReorderPlacedEvent {
    pub fn new(instance_id: InstanceId, request: &ReorderRequest, order: &PlacedOrder) -> Self {
        Self {
            instance_id,
            store_id: request.store_id.clone(),
            product_id: request.product_id.clone(),
            supplier_id: request.supplier_id.clone(),
            quantity: request.quantity,
            predicted_demand: request.predicted_demand,
            order_id: order.order_id.clone(),
            estimated_delivery: order.estimated_delivery,
            occurred_at: Utc::now(),
        }
    }
}

/// Scripted failures for an in-memory collaborator call.
#[derive(Debug, Clone, Default)]
pub(crate) enum FailureScript {
    #[default]
    Never,
    Times(u32, ActivityError),
    Always(ActivityError),
}

impl FailureScript {
    /// Returns the error the next call should fail with, if any.
    pub(crate) fn next_failure(&mut self) -> Option<ActivityError> {
        match self {
            FailureScript::Never => None,
            FailureScript::Always(error) => Some(error.clone()),
            FailureScript::Times(remaining, error) => {
                let error = error.clone();
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    *self = FailureScript::Never;
                }
                Some(error)
            }
        }
    }
}
