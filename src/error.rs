//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::domain::DomainError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Persistence errors
    #[error(transparent)]
    Store(#[from] StoreError),

    // Server errors (5xx)
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AppError {
    /// Domain error carried by this error, if any
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            AppError::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// Check if the error was caused by a concurrent writer
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Store(e) if e.is_conflict())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => match domain_err {
                DomainError::NotFound { id, .. } => {
                    (StatusCode::NOT_FOUND, "not_found", Some(id.to_string()))
                }
                DomainError::InvalidState { .. } => {
                    (StatusCode::CONFLICT, "invalid_state", Some(domain_err.to_string()))
                }
                DomainError::InsufficientFunds { .. } => {
                    (StatusCode::BAD_REQUEST, "insufficient_funds", Some(domain_err.to_string()))
                }
                DomainError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                }
                DomainError::InvalidCurrency(code) => {
                    (StatusCode::BAD_REQUEST, "invalid_currency", Some(code.clone()))
                }
                DomainError::CurrencyConversion { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "currency_conversion",
                    Some(domain_err.to_string()),
                ),
            },

            // Store errors
            AppError::Store(store_err) => match store_err {
                StoreError::Conflict { .. } | StoreError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "version_conflict", Some(store_err.to_string()))
                }
                StoreError::Duplicate { id, .. } => {
                    (StatusCode::CONFLICT, "duplicate", Some(id.to_string()))
                }
                StoreError::MissingEntity { id, .. } => {
                    (StatusCode::NOT_FOUND, "not_found", Some(id.to_string()))
                }
                StoreError::Database(e) => {
                    tracing::error!("Database error: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
                }
                StoreError::Corrupt(_) | StoreError::Serialization(_) | StoreError::Io(_) => {
                    tracing::error!("Store error: {}", store_err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "store_error", None)
                }
            },

            // 500 Internal Server Error
            AppError::Broker(e) => {
                tracing::error!("Broker error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "broker_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
