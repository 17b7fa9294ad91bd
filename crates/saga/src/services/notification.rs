//! Notification channel trait and implementations.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{FailureScript, ReorderPlacedEvent};
use crate::activities::ActivityError;

/// Delivers the completion notification for a placed reorder.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, event: &ReorderPlacedEvent) -> Result<(), ActivityError>;
}

/// Channel that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationChannel;

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn send(&self, event: &ReorderPlacedEvent) -> Result<(), ActivityError> {
        tracing::info!(
            instance_id = %event.instance_id,
            order_id = %event.order_id,
            store_id = %event.store_id,
            product_id = %event.product_id,
            quantity = event.quantity,
            "reorder placed"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<ReorderPlacedEvent>,
    failures: FailureScript,
    calls: usize,
}

/// In-memory notification channel for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationChannel {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, times: u32, error: ActivityError) {
        self.write().failures = FailureScript::Times(times, error);
    }

    pub fn fail_always(&self, error: ActivityError) {
        self.write().failures = FailureScript::Always(error);
    }

    pub fn sent(&self) -> Vec<ReorderPlacedEvent> {
        self.read().sent.clone()
    }

    pub fn calls(&self) -> usize {
        self.read().calls
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryNotificationState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryNotificationState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl NotificationChannel for InMemoryNotificationChannel {
    async fn send(&self, event: &ReorderPlacedEvent) -> Result<(), ActivityError> {
        let mut state = self.write();
        state.calls += 1;
        if let Some(error) = state.failures.next_failure() {
            return Err(error);
        }
        state.sent.push(event.clone());
        Ok(())
    }
}
