//! Metrics sink trait and implementations.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{FailureScript, ReorderPlacedEvent};
use crate::activities::ActivityError;

/// Receives placed reorders for reporting.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn publish(&self, event: &ReorderPlacedEvent) -> Result<(), ActivityError>;
}

/// Sink that records placed reorders through the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderMetricsSink;

#[async_trait]
impl MetricsSink for RecorderMetricsSink {
    async fn publish(&self, event: &ReorderPlacedEvent) -> Result<(), ActivityError> {
        let store = event.store_id.to_string();
        let supplier = event.supplier_id.to_string();
        metrics::counter!("reorders_placed_total", "store_id" => store.clone(), "supplier_id" => supplier)
            .increment(1);
        metrics::histogram!("reorder_quantity", "store_id" => store).record(f64::from(event.quantity));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryMetricsState {
    published: Vec<ReorderPlacedEvent>,
    failures: FailureScript,
    calls: usize,
}

/// In-memory metrics sink for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetricsSink {
    state: Arc<RwLock<InMemoryMetricsState>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, times: u32, error: ActivityError) {
        self.write().failures = FailureScript::Times(times, error);
    }

    pub fn fail_always(&self, error: ActivityError) {
        self.write().failures = FailureScript::Always(error);
    }

    /// Events accepted so far.
    pub fn published(&self) -> Vec<ReorderPlacedEvent> {
        self.read().published.clone()
    }

    /// Number of publish calls, including failed ones.
    pub fn calls(&self) -> usize {
        self.read().calls
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryMetricsState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryMetricsState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn publish(&self, event: &ReorderPlacedEvent) -> Result<(), ActivityError> {
        let mut state = self.write();
        state.calls += 1;
        if let Some(error) = state.failures.next_failure() {
            return Err(error);
        }
        state.published.push(event.clone());
        Ok(())
    }
}
