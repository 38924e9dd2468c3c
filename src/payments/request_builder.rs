//! Outbound request builder.
//!
//! Turns a payment request into a signed redirect URL and records the
//! pending order before the URL leaves the process.

use crate::config::{ConfigError, GatewayConfig};
use crate::database::ledger::PaymentLedger;
use crate::payments::encoding::{GatewayParams, SECURE_HASH_FIELD};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::signer::Signer;
use crate::payments::types::{CreatePaymentRequest, NewPaymentOrder, OutboundPayment};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use rand::Rng;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

/// Gateway amounts carry two extra implied decimal places.
pub const GATEWAY_AMOUNT_SCALE: i64 = 100;

/// Wire format for `vnp_CreateDate` / `vnp_ExpireDate` / `vnp_PayDate`.
pub const GATEWAY_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const SUPPORTED_LOCALES: [&str; 2] = ["vn", "en"];

fn order_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,100}$").expect("valid order id regex"))
}

fn bank_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]{1,20}$").expect("valid bank code regex"))
}

pub struct PaymentRequestBuilder {
    config: GatewayConfig,
    timezone: FixedOffset,
    expire_window: Duration,
    signer: Signer,
    ledger: Arc<dyn PaymentLedger>,
}

impl PaymentRequestBuilder {
    pub fn new(config: GatewayConfig, ledger: Arc<dyn PaymentLedger>) -> Result<Self, ConfigError> {
        let timezone = config.timezone()?;
        let expire_window = config.expire_window()?;
        let signer = Signer::new(config.hash_secret.clone());
        Ok(Self {
            config,
            timezone,
            expire_window,
            signer,
            ledger,
        })
    }

    pub async fn build(&self, request: CreatePaymentRequest) -> PaymentResult<OutboundPayment> {
        self.build_at(request, Utc::now()).await
    }

    /// Same as [`build`](Self::build) with an explicit clock reading.
    pub async fn build_at(
        &self,
        request: CreatePaymentRequest,
        now: DateTime<Utc>,
    ) -> PaymentResult<OutboundPayment> {
        self.validate(&request)?;

        // The gateway only sees whole seconds; store what we send.
        let created_at = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        let expires_at = created_at + self.expire_window;

        let order_id = match request.order_id.as_deref().map(str::trim) {
            Some(id) => id.to_string(),
            None => self.generate_order_id(now),
        };

        if self.ledger.find_by_order_id(&order_id).await?.is_some() {
            warn!(order_id = %order_id, "Rejected reused order id");
            return Err(PaymentError::DuplicateOrder { order_id });
        }

        let params = self.outbound_params(&order_id, &request, created_at, expires_at)?;
        let signature = self.signer.sign(&params);
        let payment_url = self.compose_url(&params, &signature);

        self.ledger
            .create(NewPaymentOrder {
                order_id: order_id.clone(),
                owner_ref: request.owner_ref.clone(),
                amount_minor: request.amount_minor,
                order_info: request.order_info.trim().to_string(),
                created_at,
                expires_at,
            })
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    warn!(order_id = %order_id, "Order id collided on insert");
                    PaymentError::DuplicateOrder {
                        order_id: order_id.clone(),
                    }
                } else {
                    error!(order_id = %order_id, error = %e, "Failed to persist payment order");
                    PaymentError::from(e)
                }
            })?;

        info!(
            order_id = %order_id,
            amount_minor = request.amount_minor,
            expires_at = %expires_at,
            "Payment request created"
        );

        Ok(OutboundPayment {
            order_id,
            payment_url,
            created_at,
            expires_at,
        })
    }

    /// Prefix, gateway-local timestamp to the millisecond, six random digits.
    pub fn generate_order_id(&self, now: DateTime<Utc>) -> String {
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!(
            "{}{}{:06}",
            self.config.order_id_prefix,
            now.with_timezone(&self.timezone).format("%Y%m%d%H%M%S%3f"),
            suffix
        )
    }

    fn validate(&self, request: &CreatePaymentRequest) -> PaymentResult<()> {
        if request.order_info.trim().is_empty() {
            return Err(PaymentError::missing("order_info"));
        }
        if request.client_ip.trim().is_empty() {
            return Err(PaymentError::missing("client_ip"));
        }
        if request.amount_minor < self.config.min_amount
            || request.amount_minor > self.config.max_amount
        {
            return Err(PaymentError::InvalidAmount {
                amount: request.amount_minor,
                min: self.config.min_amount,
                max: self.config.max_amount,
            });
        }

        if let Some(order_id) = request.order_id.as_deref().map(str::trim) {
            if order_id.is_empty() {
                return Err(PaymentError::missing("order_id"));
            }
            if !order_id_pattern().is_match(order_id) {
                return Err(PaymentError::invalid(
                    "order_id",
                    "only letters, digits, '-' and '_' are allowed",
                ));
            }
        }

        if let Some(locale) = request.locale.as_deref() {
            if !SUPPORTED_LOCALES.contains(&locale) {
                return Err(PaymentError::invalid("locale", "expected 'vn' or 'en'"));
            }
        }

        if let Some(bank_code) = request.bank_code.as_deref().filter(|c| !c.is_empty()) {
            if !bank_code_pattern().is_match(bank_code) {
                return Err(PaymentError::invalid("bank_code", "unexpected characters"));
            }
        }

        Ok(())
    }

    fn outbound_params(
        &self,
        order_id: &str,
        request: &CreatePaymentRequest,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> PaymentResult<GatewayParams> {
        let gateway_amount = request
            .amount_minor
            .checked_mul(GATEWAY_AMOUNT_SCALE)
            .ok_or(PaymentError::InvalidAmount {
                amount: request.amount_minor,
                min: self.config.min_amount,
                max: self.config.max_amount,
            })?;
        let locale = request
            .locale
            .clone()
            .unwrap_or_else(|| self.config.locale.clone());

        let mut params = GatewayParams::new();
        params.insert("vnp_Version", self.config.version.as_str())?;
        params.insert("vnp_Command", self.config.command.as_str())?;
        params.insert("vnp_TmnCode", self.config.merchant_code.as_str())?;
        params.insert("vnp_Locale", locale)?;
        params.insert("vnp_CurrCode", self.config.currency.as_str())?;
        params.insert("vnp_TxnRef", order_id)?;
        params.insert("vnp_OrderInfo", request.order_info.trim())?;
        params.insert("vnp_OrderType", self.config.order_type.as_str())?;
        params.insert("vnp_Amount", gateway_amount.to_string())?;
        params.insert("vnp_ReturnUrl", self.config.return_url.as_str())?;
        params.insert("vnp_IpAddr", request.client_ip.trim())?;
        params.insert("vnp_CreateDate", self.render_timestamp(created_at))?;
        params.insert("vnp_ExpireDate", self.render_timestamp(expires_at))?;
        if let Some(bank_code) = request.bank_code.as_deref().filter(|c| !c.is_empty()) {
            params.insert("vnp_BankCode", bank_code)?;
        }

        Ok(params)
    }

    fn render_timestamp(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone)
            .format(GATEWAY_TIMESTAMP_FORMAT)
            .to_string()
    }

    fn compose_url(&self, params: &GatewayParams, signature: &str) -> String {
        let separator = if self.config.pay_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}&{}={}",
            self.config.pay_url,
            separator,
            params.canonical(),
            SECURE_HASH_FIELD,
            signature
        )
    }
}
