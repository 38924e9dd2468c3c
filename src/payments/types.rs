use crate::payments::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Response code the gateway uses for a successful payment.
pub const SUCCESS_RESPONSE_CODE: &str = "00";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    /// Never stored. Derived on lookup for pending orders past `expires_at`.
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    /// Maps a gateway response code to the status it drives the order into.
    pub fn from_response_code(code: &str) -> Self {
        if code == SUCCESS_RESPONSE_CODE {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "expired" => Ok(PaymentStatus::Expired),
            _ => Err(PaymentError::malformed(format!(
                "unknown payment status: {}",
                value
            ))),
        }
    }
}

/// Human-readable meaning of a gateway response code.
pub fn describe_response_code(code: &str) -> &'static str {
    match code {
        "00" => "Payment successful",
        "07" => "Payment debited but flagged as suspicious",
        "09" => "Card or account is not registered for internet banking",
        "10" => "Card or account verification failed more than 3 times",
        "11" => "Payment window expired",
        "12" => "Card or account is locked",
        "13" => "Incorrect one-time password",
        "24" => "Payment cancelled by customer",
        "51" => "Insufficient balance",
        "65" => "Daily transaction limit exceeded",
        "75" => "Issuing bank is under maintenance",
        "79" => "Incorrect payment password entered too many times",
        _ => "Payment failed",
    }
}

/// One payment attempt as persisted in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentOrder {
    pub order_id: String,
    pub owner_ref: Option<String>,
    pub amount_minor: i64,
    pub order_info: String,
    pub status: PaymentStatus,
    pub response_code: Option<String>,
    pub external_txn_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentOrder {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && now >= self.expires_at
    }

    pub fn effective_status(&self, now: DateTime<Utc>) -> PaymentStatus {
        if self.is_expired_at(now) {
            PaymentStatus::Expired
        } else {
            self.status
        }
    }

    /// Copy of the order with the status callers should see at `now`.
    pub fn reported_at(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.effective_status(now);
        self
    }
}

/// Ledger input for a freshly requested payment.
#[derive(Debug, Clone)]
pub struct NewPaymentOrder {
    pub order_id: String,
    pub owner_ref: Option<String>,
    pub amount_minor: i64,
    pub order_info: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewPaymentOrder {
    pub fn into_pending(self) -> PaymentOrder {
        PaymentOrder {
            order_id: self.order_id,
            owner_ref: self.owner_ref,
            amount_minor: self.amount_minor,
            order_info: self.order_info,
            status: PaymentStatus::Pending,
            response_code: None,
            external_txn_ref: None,
            created_at: self.created_at,
            expires_at: self.expires_at,
            updated_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount_minor: i64,
    pub order_info: String,
    pub order_id: Option<String>,
    pub client_ip: String,
    pub bank_code: Option<String>,
    pub locale: Option<String>,
    pub owner_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundPayment {
    pub order_id: String,
    pub payment_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackChannel {
    BrowserReturn,
    ServerNotification,
}

impl CallbackChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackChannel::BrowserReturn => "browser_return",
            CallbackChannel::ServerNotification => "server_notification",
        }
    }
}

impl std::fmt::Display for CallbackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized fields of a callback whose signature has been verified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackFields {
    pub order_id: String,
    pub response_code: String,
    pub amount_minor: i64,
    pub external_txn_ref: Option<String>,
    pub pay_timestamp: Option<DateTime<Utc>>,
    pub transaction_status: Option<String>,
    pub bank_code: Option<String>,
}

impl CallbackFields {
    pub fn target_status(&self) -> PaymentStatus {
        PaymentStatus::from_response_code(&self.response_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackValidation {
    pub signature_valid: bool,
    pub fields: Option<CallbackFields>,
}

impl CallbackValidation {
    pub fn invalid() -> Self {
        Self {
            signature_valid: false,
            fields: None,
        }
    }

    pub fn into_fields(self) -> Result<CallbackFields, PaymentError> {
        match (self.signature_valid, self.fields) {
            (true, Some(fields)) => Ok(fields),
            _ => Err(PaymentError::SignatureInvalid),
        }
    }
}

/// Body the gateway expects back from the server notification endpoint.
///
/// Serialized as `{"RspCode", "Message"}` on purpose: those are the field
/// names the gateway parses, so the Rust-side `code`/`message` names are
/// renamed on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayAck {
    #[serde(rename = "RspCode")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

impl GatewayAck {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn confirmed() -> Self {
        Self::new("00", "Confirm Success")
    }

    pub fn already_confirmed() -> Self {
        Self::new("02", "Order already confirmed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn order(expires_in: Duration) -> PaymentOrder {
        let now = Utc::now();
        NewPaymentOrder {
            order_id: "PAY1".to_string(),
            owner_ref: None,
            amount_minor: 10_000,
            order_info: "Premium upgrade".to_string(),
            created_at: now,
            expires_at: now + expires_in,
        }
        .into_pending()
    }

    #[test]
    fn response_code_table_maps_only_00_to_completed() {
        assert_eq!(PaymentStatus::from_response_code("00"), PaymentStatus::Completed);
        assert_eq!(PaymentStatus::from_response_code("24"), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_response_code(""), PaymentStatus::Failed);
        assert_eq!(describe_response_code("24"), "Payment cancelled by customer");
    }

    #[test]
    fn pending_order_past_expiry_reports_expired() {
        let order = order(Duration::minutes(-1));
        assert_eq!(order.effective_status(Utc::now()), PaymentStatus::Expired);
        assert_eq!(order.reported_at(Utc::now()).status, PaymentStatus::Expired);
    }

    #[test]
    fn terminal_order_never_reports_expired() {
        let mut order = order(Duration::minutes(-1));
        order.status = PaymentStatus::Completed;
        assert_eq!(order.effective_status(Utc::now()), PaymentStatus::Completed);
    }

    #[test]
    fn gateway_ack_serializes_with_gateway_field_names() {
        let json = serde_json::to_value(GatewayAck::confirmed()).expect("serialize ack");
        assert_eq!(json, serde_json::json!({"RspCode": "00", "Message": "Confirm Success"}));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
        ] {
            assert_eq!(PaymentStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(PaymentStatus::from_str("refunded").is_err());
    }
}
