//! Reorder rule store trait and in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use domain::{ProductId, ReorderRequest, StoreId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::FailureScript;
use crate::activities::ActivityError;

/// Thresholds a request must meet for one store and product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorderRule {
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub min_quantity: u32,
    pub max_quantity: u32,
    /// Reorders are only approved when predicted demand reaches this value.
    #[serde(default)]
    pub min_predicted_demand: f64,
}

/// Errors raised for malformed rules.
#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("min_quantity {min} exceeds max_quantity {max}")]
    InvalidQuantityRange { min: u32, max: u32 },

    #[error("Invalid min_predicted_demand: {0}")]
    InvalidDemandThreshold(f64),
}

impl ReorderRule {
    pub fn new(
        store_id: StoreId,
        product_id: ProductId,
        min_quantity: u32,
        max_quantity: u32,
        min_predicted_demand: f64,
    ) -> Result<Self, RuleError> {
        let rule = Self {
            store_id,
            product_id,
            min_quantity,
            max_quantity,
            min_predicted_demand,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        if self.min_quantity > self.max_quantity {
            return Err(RuleError::InvalidQuantityRange {
                min: self.min_quantity,
                max: self.max_quantity,
            });
        }
        if !self.min_predicted_demand.is_finite() || self.min_predicted_demand < 0.0 {
            return Err(RuleError::InvalidDemandThreshold(self.min_predicted_demand));
        }
        Ok(())
    }

    /// Returns true if the request falls inside this rule's thresholds.
    pub fn approves(&self, request: &ReorderRequest) -> bool {
        (self.min_quantity..=self.max_quantity).contains(&request.quantity)
            && request.predicted_demand >= self.min_predicted_demand
    }
}

/// Checks a request against stored reorder rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn validate(&self, request: &ReorderRequest) -> Result<bool, ActivityError>;
}

#[derive(Debug, Default)]
struct InMemoryRuleState {
    rules: BTreeMap<(StoreId, ProductId), ReorderRule>,
    approve_unmatched: bool,
    failures: FailureScript,
    validate_calls: usize,
}

/// In-memory rule store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRuleStore {
    state: Arc<RwLock<InMemoryRuleState>>,
}

impl InMemoryRuleStore {
    /// Creates an empty store that rejects requests without a rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that approves requests for which no rule exists.
    pub fn approving_unmatched() -> Self {
        let store = Self::default();
        store.set_approve_unmatched(true);
        store
    }

    pub fn set_approve_unmatched(&self, approve: bool) {
        self.write().approve_unmatched = approve;
    }

    /// Inserts or replaces the rule for its store and product.
    pub fn upsert(&self, rule: ReorderRule) -> Result<(), RuleError> {
        rule.validate()?;
        let key = (rule.store_id.clone(), rule.product_id.clone());
        self.write().rules.insert(key, rule);
        Ok(())
    }

    /// Removes a rule, returning it if it existed.
    pub fn remove(&self, store_id: &StoreId, product_id: &ProductId) -> Option<ReorderRule> {
        self.write()
            .rules
            .remove(&(store_id.clone(), product_id.clone()))
    }

    /// All rules, ordered by store and product.
    pub fn list(&self) -> Vec<ReorderRule> {
        self.read().rules.values().cloned().collect()
    }

    /// Makes the next `times` validate calls fail with `error`.
    pub fn fail_next(&self, times: u32, error: ActivityError) {
        self.write().failures = FailureScript::Times(times, error);
    }

    /// Makes every validate call fail with `error`.
    pub fn fail_always(&self, error: ActivityError) {
        self.write().failures = FailureScript::Always(error);
    }

    /// Number of validate calls received.
    pub fn validate_calls(&self) -> usize {
        self.read().validate_calls
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryRuleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryRuleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn validate(&self, request: &ReorderRequest) -> Result<bool, ActivityError> {
        let mut state = self.write();
        state.validate_calls += 1;

        if let Some(error) = state.failures.next_failure() {
            return Err(error);
        }

        let key = (request.store_id.clone(), request.product_id.clone());
        Ok(match state.rules.get(&key) {
            Some(rule) => rule.approves(request),
            None => state.approve_unmatched,
        })
    }
}
