//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use event_store::EventStoreError;
use saga::{RuleError, SagaError};
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Domain logic error.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Saga execution error.
    #[error(transparent)]
    Saga(#[from] SagaError),
    /// Rejected reorder rule.
    #[error(transparent)]
    Rule(#[from] RuleError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Rule(err) => (StatusCode::BAD_REQUEST, err.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    match &err {
        DomainError::InstanceNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        DomainError::Reorder(_) => (StatusCode::CONFLICT, err.to_string()),
        DomainError::EventStore(EventStoreError::ConcurrencyConflict { .. }) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match err {
        SagaError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::InstanceNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::IdempotencyConflict { .. } | SagaError::CancellationRefused { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        SagaError::DispatcherClosed => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        SagaError::Domain(domain) => domain_error_to_response(domain),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
