//! Application error handling
//!
//! One error type for the HTTP layer with status mapping, stable error
//! codes for clients, and user-facing messages that never carry secrets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error codes returned to API clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "DUPLICATE_ORDER")]
    DuplicateOrder,
    #[serde(rename = "AMOUNT_MISMATCH")]
    AmountMismatch,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "ORDER_EXPIRED")]
    OrderExpired,
    #[serde(rename = "ORDER_ALREADY_SETTLED")]
    OrderAlreadySettled,

    // Validation errors (400)
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,

    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Payment lifecycle errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Order reference already exists in the ledger
    DuplicateOrder { order_id: String },
    /// Callback amount differs from the stored order
    AmountMismatch {
        order_id: String,
        expected: i64,
        received: i64,
    },
    OrderNotFound { order_id: String },
    /// Pending order is past its payment window
    OrderExpired { order_id: String },
    /// Order is already terminal in a different state
    StatusConflict {
        order_id: String,
        current: String,
        target: String,
    },
}

/// Infrastructure-level errors
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Required field missing
    MissingField { field: String },
    /// Field present but unusable
    InvalidField { field: String, reason: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        value: String,
        min: Option<String>,
        max: Option<String>,
    },
    /// Callback signature did not verify
    InvalidSignature,
    /// Input that cannot be a gateway message
    Malformed { message: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DuplicateOrder { .. } => 409,
                DomainError::AmountMismatch { .. } => 422,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::OrderExpired { .. } => 410, // Gone
                DomainError::StatusConflict { .. } => 409,
            },
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. }) => {
                if *is_retryable {
                    503
                } else {
                    500
                }
            }
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DuplicateOrder { .. } => ErrorCode::DuplicateOrder,
                DomainError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::OrderExpired { .. } => ErrorCode::OrderExpired,
                DomainError::StatusConflict { .. } => ErrorCode::OrderAlreadySettled,
            },
            AppErrorKind::Infrastructure(InfrastructureError::Database { .. }) => {
                ErrorCode::DatabaseError
            }
            AppErrorKind::Validation(err) => match err {
                ValidationError::OutOfRange { field, .. } if field == "amount" => {
                    ErrorCode::InvalidAmount
                }
                ValidationError::InvalidSignature => ErrorCode::InvalidSignature,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DuplicateOrder { order_id } => {
                    format!("Order '{}' already exists", order_id)
                }
                // Stored amounts stay out of client responses.
                DomainError::AmountMismatch { order_id, .. } => {
                    format!("Payment amount for order '{}' does not match", order_id)
                }
                DomainError::OrderNotFound { order_id } => {
                    format!("Order '{}' not found", order_id)
                }
                DomainError::OrderExpired { order_id } => {
                    format!(
                        "Order '{}' has expired. Please start a new payment",
                        order_id
                    )
                }
                DomainError::StatusConflict {
                    order_id, current, ..
                } => {
                    format!("Order '{}' is already {}", order_id, current)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::OutOfRange {
                    field, min, max, ..
                } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => {
                        format!("Field '{}' must be at least {}", field, min)
                    }
                    (None, Some(max)) => {
                        format!("Field '{}' must be at most {}", field, max)
                    }
                    (None, None) => {
                        format!("Field '{}' is out of acceptable range", field)
                    }
                },
                ValidationError::InvalidSignature => {
                    "Payment response could not be verified".to_string()
                }
                ValidationError::Malformed { .. } => "Malformed payment response".to_string(),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs
