//! Inbound callback validation.
//!
//! Shared by the browser return and the server notification channel. Pure
//! parsing: nothing here touches the ledger.

use crate::payments::encoding::{GatewayParams, SECURE_HASH_FIELD, SECURE_HASH_TYPE_FIELD};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::request_builder::{GATEWAY_AMOUNT_SCALE, GATEWAY_TIMESTAMP_FORMAT};
use crate::payments::signer::Signer;
use crate::payments::types::{CallbackFields, CallbackValidation};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CallbackValidator {
    signer: Signer,
    timezone: FixedOffset,
}

impl CallbackValidator {
    pub fn new(signer: Signer, timezone: FixedOffset) -> Self {
        Self { signer, timezone }
    }

    /// Verifies the signature over every received field except the signature
    /// pair, then extracts the normalized fields.
    ///
    /// A bad or absent signature is an expected outcome and is reported via
    /// `signature_valid = false`. Errors are reserved for input that cannot be
    /// a gateway message at all (repeated keys) or for signed messages that
    /// lack a required field.
    pub fn validate<I, K, V>(&self, pairs: I) -> PaymentResult<CallbackValidation>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = GatewayParams::from_pairs(pairs)?;
        let signature = params.remove(SECURE_HASH_FIELD);
        params.remove(SECURE_HASH_TYPE_FIELD);

        let signature = match signature.filter(|s| !s.trim().is_empty()) {
            Some(signature) => signature,
            None => {
                warn!(
                    order_id = params.get("vnp_TxnRef").unwrap_or_default(),
                    "Callback carried no signature"
                );
                return Ok(CallbackValidation::invalid());
            }
        };

        if !self.signer.verify(&params, &signature) {
            warn!(
                order_id = params.get("vnp_TxnRef").unwrap_or_default(),
                "Callback signature mismatch"
            );
            return Ok(CallbackValidation::invalid());
        }

        let fields = self.extract(&params)?;
        debug!(
            order_id = %fields.order_id,
            response_code = %fields.response_code,
            "Callback signature verified"
        );

        Ok(CallbackValidation {
            signature_valid: true,
            fields: Some(fields),
        })
    }

    fn extract(&self, params: &GatewayParams) -> PaymentResult<CallbackFields> {
        let order_id = required(params, "vnp_TxnRef")?.to_string();
        let response_code = required(params, "vnp_ResponseCode")?.to_string();
        let amount_minor = parse_amount(required(params, "vnp_Amount")?)?;

        let pay_timestamp =
            optional(params, "vnp_PayDate").and_then(|raw| self.parse_timestamp(&order_id, raw));

        // The gateway sends "0" as the transaction number when none was assigned.
        let external_txn_ref = optional(params, "vnp_TransactionNo")
            .filter(|v| *v != "0")
            .map(str::to_string);

        Ok(CallbackFields {
            order_id,
            response_code,
            amount_minor,
            external_txn_ref,
            pay_timestamp,
            transaction_status: optional(params, "vnp_TransactionStatus").map(str::to_string),
            bank_code: optional(params, "vnp_BankCode").map(str::to_string),
        })
    }

    /// The pay date is informational; an unreadable one is dropped, not fatal.
    fn parse_timestamp(&self, order_id: &str, raw: &str) -> Option<DateTime<Utc>> {
        let parsed = NaiveDateTime::parse_from_str(raw, GATEWAY_TIMESTAMP_FORMAT)
            .ok()
            .and_then(|naive| self.timezone.from_local_datetime(&naive).single())
            .map(|local| local.with_timezone(&Utc));
        if parsed.is_none() {
            warn!(order_id = %order_id, pay_date = %raw, "Ignoring unparseable vnp_PayDate");
        }
        parsed
    }
}

fn optional<'a>(params: &'a GatewayParams, key: &str) -> Option<&'a str> {
    params.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(params: &'a GatewayParams, key: &str) -> PaymentResult<&'a str> {
    optional(params, key).ok_or_else(|| PaymentError::missing(key))
}

/// Converts the gateway's scaled amount back to local minor units. Anything
/// that does not divide exactly is not an amount we ever sent.
fn parse_amount(raw: &str) -> PaymentResult<i64> {
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PaymentError::malformed(format!("vnp_Amount is not numeric: {}", raw)));
    }
    let scaled: i64 = raw
        .parse()
        .map_err(|_| PaymentError::malformed(format!("vnp_Amount out of range: {}", raw)))?;
    if scaled % GATEWAY_AMOUNT_SCALE != 0 {
        return Err(PaymentError::malformed(format!(
            "vnp_Amount has fractional minor units: {}",
            raw
        )));
    }
    Ok(scaled / GATEWAY_AMOUNT_SCALE)
}
