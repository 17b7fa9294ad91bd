//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod reorder;
pub mod rules;
