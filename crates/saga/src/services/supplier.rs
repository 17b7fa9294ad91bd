//! Supplier client trait and in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{Days, Utc};
use common::IdempotencyKey;
use domain::{Availability, PlacedOrder, ProductId, ReorderRequest, SupplierId};

use super::FailureScript;
use crate::activities::ActivityError;

/// Client for the supplier's ordering system.
#[async_trait]
pub trait SupplierClient: Send + Sync {
    /// Asks whether the supplier can currently fulfil `product_id`.
    async fn check_availability(
        &self,
        supplier_id: &SupplierId,
        product_id: &ProductId,
    ) -> Result<Availability, ActivityError>;

    /// Places an order.
    ///
    /// Calls repeated with the same `idempotency_key` must return the
    /// original order instead of creating a new one.
    async fn place_order(
        &self,
        request: &ReorderRequest,
        idempotency_key: &IdempotencyKey,
    ) -> Result<PlacedOrder, ActivityError>;
}

#[derive(Debug, Default)]
struct InMemorySupplierState {
    /// Raw status per (supplier, product); missing entries are "available".
    statuses: HashMap<(SupplierId, ProductId), String>,
    orders: HashMap<String, PlacedOrder>,
    scripted_order_ids: VecDeque<String>,
    next_seq: u32,
    lead_time_days: Option<u64>,
    check_failures: FailureScript,
    place_failures: FailureScript,
    lost_responses: u32,
    check_calls: usize,
    place_calls: usize,
}

/// In-memory supplier that records orders keyed by idempotency token.
#[derive(Debug, Clone, Default)]
pub struct InMemorySupplierClient {
    state: Arc<RwLock<InMemorySupplierState>>,
}

impl InMemorySupplierClient {
    /// Creates a supplier for which every product is available.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw status the supplier reports for a product.
    pub fn set_status(&self, supplier_id: &str, product_id: &str, status: &str) {
        self.write().statuses.insert(
            (SupplierId::new(supplier_id), ProductId::new(product_id)),
            status.to_string(),
        );
    }

    /// Queues an order ID to hand out for the next new order.
    pub fn push_order_id(&self, order_id: impl Into<String>) {
        self.write().scripted_order_ids.push_back(order_id.into());
    }

    /// Orders get an estimated delivery this many days from today.
    pub fn set_lead_time_days(&self, days: u64) {
        self.write().lead_time_days = Some(days);
    }

    pub fn fail_check_next(&self, times: u32, error: ActivityError) {
        self.write().check_failures = FailureScript::Times(times, error);
    }

    pub fn fail_check_always(&self, error: ActivityError) {
        self.write().check_failures = FailureScript::Always(error);
    }

    pub fn fail_place_next(&self, times: u32, error: ActivityError) {
        self.write().place_failures = FailureScript::Times(times, error);
    }

    pub fn fail_place_always(&self, error: ActivityError) {
        self.write().place_failures = FailureScript::Always(error);
    }

    /// The next `times` orders are created but the caller sees a timeout,
    /// as if the response was lost in transit.
    pub fn lose_next_responses(&self, times: u32) {
        self.write().lost_responses = times;
    }

    pub fn check_calls(&self) -> usize {
        self.read().check_calls
    }

    pub fn place_calls(&self) -> usize {
        self.read().place_calls
    }

    /// Number of distinct orders created.
    pub fn order_count(&self) -> usize {
        self.read().orders.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemorySupplierState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemorySupplierState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SupplierClient for InMemorySupplierClient {
    async fn check_availability(
        &self,
        supplier_id: &SupplierId,
        product_id: &ProductId,
    ) -> Result<Availability, ActivityError> {
        let mut state = self.write();
        state.check_calls += 1;

        if let Some(error) = state.check_failures.next_failure() {
            return Err(error);
        }

        let status = state
            .statuses
            .get(&(supplier_id.clone(), product_id.clone()))
            .map(String::as_str)
            .unwrap_or("available");
        Ok(Availability::from_status(status))
    }

    async fn place_order(
        &self,
        request: &ReorderRequest,
        idempotency_key: &IdempotencyKey,
    ) -> Result<PlacedOrder, ActivityError> {
        let mut state = self.write();
        state.place_calls += 1;

        if let Some(error) = state.place_failures.next_failure() {
            return Err(error);
        }

        let existing = state.orders.get(idempotency_key.as_str()).cloned();
        let order = match existing {
            Some(order) => order,
            None => {
                state.next_seq += 1;
                let order_id = match state.scripted_order_ids.pop_front() {
                    Some(id) => id,
                    None => format!("ORDER-{:04}", state.next_seq),
                };
                let mut order = PlacedOrder::new(order_id);
                if let Some(date) = state
                    .lead_time_days
                    .and_then(|days| Utc::now().date_naive().checked_add_days(Days::new(days)))
                {
                    order = order.with_estimated_delivery(date);
                }
                tracing::debug!(
                    order_id = %order.order_id,
                    supplier_id = %request.supplier_id,
                    quantity = request.quantity,
                    "supplier order created"
                );
                state
                    .orders
                    .insert(idempotency_key.as_str().to_string(), order.clone());
                order
            }
        };

        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(ActivityError::transient("supplier response lost"));
        }

        Ok(order)
    }
}
