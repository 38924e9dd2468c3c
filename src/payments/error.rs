use thiserror::Error;

use crate::payments::types::GatewayAck;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Invalid amount: {amount} is outside [{min}, {max}]")]
    InvalidAmount { amount: i64, min: i64, max: i64 },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Duplicate order: {order_id}")]
    DuplicateOrder { order_id: String },

    #[error("Callback signature verification failed")]
    SignatureInvalid,

    #[error("Malformed callback: {message}")]
    MalformedCallback { message: String },

    #[error("Amount mismatch for order {order_id}: expected {expected}, received {received}")]
    AmountMismatch {
        order_id: String,
        expected: i64,
        received: i64,
    },

    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: String },

    #[error("Order expired: {order_id}")]
    OrderExpired { order_id: String },

    #[error("Order {order_id} is already {current}, refusing transition to {target}")]
    Conflict {
        order_id: String,
        current: String,
        target: String,
    },

    #[error("Transient store failure: {message}")]
    TransientStoreFailure { message: String },

    /// Storage rejected the operation and will keep rejecting it.
    #[error("Store failure: {message}")]
    StoreFailure { message: String },
}

impl PaymentError {
    pub fn missing(field: impl Into<String>) -> Self {
        PaymentError::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PaymentError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        PaymentError::MalformedCallback {
            message: message.into(),
        }
    }

    /// Only storage failures are worth a gateway retry; every other rejection
    /// is final for the delivery that produced it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::TransientStoreFailure { .. })
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::InvalidAmount { .. } => 400,
            PaymentError::MissingField { .. } => 400,
            PaymentError::InvalidField { .. } => 400,
            PaymentError::DuplicateOrder { .. } => 409,
            PaymentError::SignatureInvalid => 400,
            PaymentError::MalformedCallback { .. } => 400,
            PaymentError::AmountMismatch { .. } => 422,
            PaymentError::OrderNotFound { .. } => 404,
            PaymentError::OrderExpired { .. } => 410,
            PaymentError::Conflict { .. } => 409,
            PaymentError::TransientStoreFailure { .. } => 503,
            PaymentError::StoreFailure { .. } => 500,
        }
    }

    /// Short machine-readable reason used in audit logs.
    pub fn reason(&self) -> &'static str {
        match self {
            PaymentError::InvalidAmount { .. } => "invalid_amount",
            PaymentError::MissingField { .. } => "missing_field",
            PaymentError::InvalidField { .. } => "invalid_field",
            PaymentError::DuplicateOrder { .. } => "duplicate_order",
            PaymentError::SignatureInvalid => "signature_invalid",
            PaymentError::MalformedCallback { .. } => "malformed_callback",
            PaymentError::AmountMismatch { .. } => "amount_mismatch",
            PaymentError::OrderNotFound { .. } => "order_not_found",
            PaymentError::OrderExpired { .. } => "order_expired",
            PaymentError::Conflict { .. } => "conflict",
            PaymentError::TransientStoreFailure { .. } => "transient_store_failure",
            PaymentError::StoreFailure { .. } => "store_failure",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::InvalidAmount { min, max, .. } => {
                format!("Amount must be between {} and {}", min, max)
            }
            PaymentError::MissingField { field } => format!("{} is required", field),
            PaymentError::InvalidField { field, reason } => format!("Invalid {}: {}", field, reason),
            PaymentError::DuplicateOrder { .. } => "Order reference already exists".to_string(),
            PaymentError::SignatureInvalid => "Invalid payment signature".to_string(),
            PaymentError::MalformedCallback { .. } => "Invalid payment callback".to_string(),
            PaymentError::AmountMismatch { .. } => "Payment amount does not match".to_string(),
            PaymentError::OrderNotFound { .. } => "Order not found".to_string(),
            PaymentError::OrderExpired { .. } => "Payment order has expired".to_string(),
            PaymentError::Conflict { .. } => "Order has already been processed".to_string(),
            PaymentError::TransientStoreFailure { .. } | PaymentError::StoreFailure { .. } => {
                "Payment service is temporarily unavailable".to_string()
            }
        }
    }

    /// Acknowledgment body for the gateway's server notification channel.
    pub fn gateway_ack(&self) -> GatewayAck {
        match self {
            PaymentError::OrderNotFound { .. } => GatewayAck::new("01", "Order not found"),
            PaymentError::Conflict { .. } => GatewayAck::new("02", "Order already confirmed"),
            PaymentError::OrderExpired { .. } => GatewayAck::new("02", "Order expired"),
            PaymentError::AmountMismatch { .. } => GatewayAck::new("04", "Invalid amount"),
            PaymentError::SignatureInvalid => GatewayAck::new("97", "Invalid signature"),
            PaymentError::TransientStoreFailure { .. } | PaymentError::StoreFailure { .. } => {
                GatewayAck::new("99", "Unknown error")
            }
            PaymentError::InvalidAmount { .. }
            | PaymentError::MissingField { .. }
            | PaymentError::InvalidField { .. }
            | PaymentError::DuplicateOrder { .. }
            | PaymentError::MalformedCallback { .. } => GatewayAck::new("99", "Invalid request"),
        }
    }
}

impl From<crate::database::error::DatabaseError> for PaymentError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        if err.is_retryable() {
            PaymentError::TransientStoreFailure {
                message: err.to_string(),
            }
        } else {
            PaymentError::StoreFailure {
                message: err.to_string(),
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, DomainError, InfrastructureError, ValidationError,
        };

        let kind = match err {
            PaymentError::InvalidAmount { amount, min, max } => {
                AppErrorKind::Validation(ValidationError::OutOfRange {
                    field: "amount".to_string(),
                    value: amount.to_string(),
                    min: Some(min.to_string()),
                    max: Some(max.to_string()),
                })
            }
            PaymentError::MissingField { field } => {
                AppErrorKind::Validation(ValidationError::MissingField { field })
            }
            PaymentError::InvalidField { field, reason } => {
                AppErrorKind::Validation(ValidationError::InvalidField { field, reason })
            }
            PaymentError::SignatureInvalid => {
                AppErrorKind::Validation(ValidationError::InvalidSignature)
            }
            PaymentError::MalformedCallback { message } => {
                AppErrorKind::Validation(ValidationError::Malformed { message })
            }
            PaymentError::DuplicateOrder { order_id } => {
                AppErrorKind::Domain(DomainError::DuplicateOrder { order_id })
            }
            PaymentError::AmountMismatch {
                order_id,
                expected,
                received,
            } => AppErrorKind::Domain(DomainError::AmountMismatch {
                order_id,
                expected,
                received,
            }),
            PaymentError::OrderNotFound { order_id } => {
                AppErrorKind::Domain(DomainError::OrderNotFound { order_id })
            }
            PaymentError::OrderExpired { order_id } => {
                AppErrorKind::Domain(DomainError::OrderExpired { order_id })
            }
            PaymentError::Conflict {
                order_id,
                current,
                target,
            } => AppErrorKind::Domain(DomainError::StatusConflict {
                order_id,
                current,
                target,
            }),
            PaymentError::TransientStoreFailure { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: true,
                })
            }
            PaymentError::StoreFailure { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: false,
                })
            }
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::InvalidAmount {
                amount: 1,
                min: 5_000,
                max: 500_000_000
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::TransientStoreFailure {
                message: "pool timed out".to_string()
            }
            .http_status_code(),
            503
        );
    }

    #[test]
    fn only_store_failures_are_retryable() {
        assert!(PaymentError::TransientStoreFailure {
            message: "down".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::SignatureInvalid.is_retryable());
        assert!(!PaymentError::AmountMismatch {
            order_id: "o1".to_string(),
            expected: 10,
            received: 11
        }
        .is_retryable());
    }

    #[test]
    fn only_connection_failures_become_transient() {
        use crate::database::error::{DatabaseError, DatabaseErrorKind};

        let outage: PaymentError = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut).into();
        assert!(outage.is_retryable());

        let decode: PaymentError = DatabaseError::new(DatabaseErrorKind::Decode {
            message: "unknown status".to_string(),
        })
        .into();
        assert!(!decode.is_retryable());
        assert_eq!(decode.reason(), "store_failure");
        assert_eq!(decode.gateway_ack().code, "99");
        assert_eq!(crate::error::AppError::from(decode).status_code(), 500);
    }

    #[test]
    fn gateway_ack_codes_follow_rejection_reason() {
        assert_eq!(
            PaymentError::OrderNotFound {
                order_id: "o1".to_string()
            }
            .gateway_ack()
            .code,
            "01"
        );
        assert_eq!(
            PaymentError::AmountMismatch {
                order_id: "o1".to_string(),
                expected: 1,
                received: 2
            }
            .gateway_ack()
            .code,
            "04"
        );
        assert_eq!(PaymentError::SignatureInvalid.gateway_ack().code, "97");
    }
}
