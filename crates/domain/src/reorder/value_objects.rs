//! Value objects for the reorder domain.

use serde::{Deserialize, Serialize};

use super::ReorderError;

/// Storefront identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    /// Creates a new store ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the store ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supplier identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(String);

impl SupplierId {
    /// Creates a new supplier ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the supplier ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SupplierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input to one reorder instance. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorderRequest {
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub supplier_id: SupplierId,
    /// Demand predicted by the forecasting model for the reorder horizon.
    pub predicted_demand: f64,
}

impl ReorderRequest {
    /// Creates a validated reorder request.
    pub fn new(
        store_id: impl Into<String>,
        product_id: impl Into<String>,
        quantity: u32,
        supplier_id: impl Into<String>,
        predicted_demand: f64,
    ) -> Result<Self, ReorderError> {
        let request = Self {
            store_id: StoreId::new(store_id),
            product_id: ProductId::new(product_id),
            quantity,
            supplier_id: SupplierId::new(supplier_id),
            predicted_demand,
        };
        request.validate()?;
        Ok(request)
    }

    /// Checks the structural invariants of the request.
    ///
    /// Used both on construction and on requests that arrive deserialized.
    pub fn validate(&self) -> Result<(), ReorderError> {
        if self.store_id.as_str().trim().is_empty() {
            return Err(ReorderError::EmptyIdentifier { field: "store_id" });
        }
        if self.product_id.as_str().trim().is_empty() {
            return Err(ReorderError::EmptyIdentifier { field: "product_id" });
        }
        if self.supplier_id.as_str().trim().is_empty() {
            return Err(ReorderError::EmptyIdentifier {
                field: "supplier_id",
            });
        }
        if self.quantity == 0 {
            return Err(ReorderError::InvalidQuantity {
                quantity: self.quantity,
            });
        }
        if !self.predicted_demand.is_finite() || self.predicted_demand < 0.0 {
            return Err(ReorderError::InvalidPredictedDemand {
                value: self.predicted_demand,
            });
        }
        Ok(())
    }
}
