//! Error handling module
//!
//! Centralized error types and HTTP response conversion. Business errors
//! are values everywhere inside the engine; they only become status codes
//! here, at the outer boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::device::DeviceError;
use crate::domain::DomainError;
use crate::ledger::LedgerError;
use crate::limits::LimitError;
use crate::ratelimit::RateLimitError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// Deliberately generic: scoring internals are never exposed.
    #[error("Transaction could not be completed")]
    FraudBlocked,

    #[error("Verification required before this transaction can proceed")]
    VerificationRequired,

    #[error("Rate limit exceeded")]
    RateLimited {
        lockout_until: Option<DateTime<Utc>>,
    },

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Storage error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Domain(domain) => AppError::Domain(domain),
            LedgerError::Store(store) => AppError::Store(store),
            LedgerError::MaxRetriesExceeded => AppError::Domain(DomainError::VersionConflict {
                expected: 0,
                found: 0,
            }),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e)
    }
}

impl From<LimitError> for AppError {
    fn from(e: LimitError) -> Self {
        match e {
            LimitError::Store(store) => AppError::Store(store),
        }
    }
}

impl From<RateLimitError> for AppError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::Store(store) => AppError::Store(store),
        }
    }
}

impl From<DeviceError> for AppError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::Store(store) => AppError::Store(store),
            DeviceError::Corrupt(id) => {
                AppError::Internal(format!("unreadable device record: {id}"))
            }
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockout_until: Option<DateTime<Utc>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut lockout_until = None;

        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::MissingHeader(header) => (
                StatusCode::BAD_REQUEST,
                "missing_header",
                Some(header.clone()),
            ),

            // 403 Forbidden
            AppError::FraudBlocked => (StatusCode::FORBIDDEN, "transaction_declined", None),
            AppError::VerificationRequired => {
                (StatusCode::FORBIDDEN, "verification_required", None)
            }

            // 429 Too Many Requests
            AppError::RateLimited {
                lockout_until: until,
            } => {
                lockout_until = *until;
                (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded", None)
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(ref domain_err) => match domain_err {
                DomainError::InsufficientFunds { .. } => {
                    (StatusCode::BAD_REQUEST, "insufficient_funds", None)
                }
                DomainError::AccountFrozen => (StatusCode::BAD_REQUEST, "account_frozen", None),
                DomainError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                }
                DomainError::AmountOutOfBounds(msg) => (
                    StatusCode::BAD_REQUEST,
                    "amount_out_of_bounds",
                    Some(msg.clone()),
                ),
                DomainError::AccountNotFound(id) => {
                    (StatusCode::NOT_FOUND, "account_not_found", Some(id.clone()))
                }
                DomainError::BeneficiaryNotFound(id) => (
                    StatusCode::NOT_FOUND,
                    "beneficiary_not_found",
                    Some(id.clone()),
                ),
                DomainError::BeneficiaryInactive(id) => (
                    StatusCode::BAD_REQUEST,
                    "beneficiary_inactive",
                    Some(id.clone()),
                ),
                DomainError::BeneficiaryNotOwned => {
                    (StatusCode::FORBIDDEN, "beneficiary_not_owned", None)
                }
                DomainError::SameAccountTransfer => {
                    (StatusCode::BAD_REQUEST, "same_account_transfer", None)
                }
                DomainError::LimitExceeded { scope } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "limit_exceeded",
                    Some(scope.to_string()),
                ),
                DomainError::VersionConflict { .. } => {
                    (StatusCode::CONFLICT, "version_conflict", None)
                }
                DomainError::DuplicateOperation { key } => {
                    (StatusCode::CONFLICT, "duplicate_operation", Some(key.clone()))
                }
            },

            // 500 Internal Server Error
            AppError::Store(e) => {
                tracing::error!("Storage error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
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
            lockout_until,
        };

        (status, Json(body)).into_response()
    }
}
