//! Applies validated gateway callbacks to the ledger.
//!
//! Both callback channels land here. The ledger's conditional transition
//! picks a single winner per order and only the winner may trigger the
//! entitlement grant.

use crate::database::ledger::{PaymentLedger, Transition};
use crate::payments::callback::CallbackValidator;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{
    describe_response_code, CallbackChannel, CallbackFields, GatewayAck, PaymentOrder,
    PaymentStatus,
};
use crate::services::entitlement::EntitlementService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub order: PaymentOrder,
    /// True only for the delivery that moved the order out of `pending`.
    pub applied: bool,
    pub entitlement_granted: bool,
}

/// What the notification endpoint sends back to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationReply {
    pub ack: GatewayAck,
    /// Set when the gateway should redeliver, which requires a non-200 reply.
    pub retryable: bool,
}

impl NotificationReply {
    fn final_ack(ack: GatewayAck) -> Self {
        Self {
            ack,
            retryable: false,
        }
    }
}

/// Outcome shown to the customer after the browser redirect.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReturnOutcome {
    pub success: bool,
    pub order_id: String,
    pub status: PaymentStatus,
    pub amount_minor: i64,
    pub code: String,
    pub message: String,
}

pub struct ReconciliationCoordinator {
    validator: CallbackValidator,
    ledger: Arc<dyn PaymentLedger>,
    entitlements: Arc<dyn EntitlementService>,
}

impl ReconciliationCoordinator {
    pub fn new(
        validator: CallbackValidator,
        ledger: Arc<dyn PaymentLedger>,
        entitlements: Arc<dyn EntitlementService>,
    ) -> Self {
        Self {
            validator,
            ledger,
            entitlements,
        }
    }

    pub async fn reconcile(
        &self,
        fields: &CallbackFields,
        channel: CallbackChannel,
    ) -> PaymentResult<ReconcileOutcome> {
        self.reconcile_at(fields, channel, Utc::now()).await
    }

    pub async fn reconcile_at(
        &self,
        fields: &CallbackFields,
        channel: CallbackChannel,
        now: DateTime<Utc>,
    ) -> PaymentResult<ReconcileOutcome> {
        let order_id = fields.order_id.as_str();

        let order = match self.ledger.find_by_order_id(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                return Err(self.reject(
                    channel,
                    PaymentError::OrderNotFound {
                        order_id: order_id.to_string(),
                    },
                ))
            }
            Err(e) => return Err(self.reject(channel, e.into())),
        };

        if fields.amount_minor != order.amount_minor {
            return Err(self.reject(
                channel,
                PaymentError::AmountMismatch {
                    order_id: order_id.to_string(),
                    expected: order.amount_minor,
                    received: fields.amount_minor,
                },
            ));
        }

        let target = fields.target_status();

        if target == PaymentStatus::Completed && order.is_expired_at(now) {
            return Err(self.reject(
                channel,
                PaymentError::OrderExpired {
                    order_id: order_id.to_string(),
                },
            ));
        }

        let transition = self
            .ledger
            .transition_to(
                order_id,
                target,
                fields.external_txn_ref.as_deref(),
                Some(fields.response_code.as_str()),
            )
            .await
            .map_err(|e| {
                let err = if e.is_not_found() {
                    PaymentError::OrderNotFound {
                        order_id: order_id.to_string(),
                    }
                } else {
                    e.into()
                };
                self.reject(channel, err)
            })?;

        match transition {
            Transition::Applied(order) => {
                info!(
                    order_id = %order.order_id,
                    channel = %channel,
                    status = %order.status,
                    response_code = %fields.response_code,
                    "Payment order transitioned"
                );
                let entitlement_granted = self.grant_entitlement(&order).await;
                Ok(ReconcileOutcome {
                    order,
                    applied: true,
                    entitlement_granted,
                })
            }
            Transition::Replayed(order) => {
                info!(
                    order_id = %order.order_id,
                    channel = %channel,
                    status = %order.status,
                    "Duplicate callback, order already settled"
                );
                Ok(ReconcileOutcome {
                    order,
                    applied: false,
                    entitlement_granted: false,
                })
            }
            Transition::Conflict(order) => Err(self.reject(
                channel,
                PaymentError::Conflict {
                    order_id: order.order_id,
                    current: order.status.to_string(),
                    target: target.to_string(),
                },
            )),
        }
    }

    /// Full server notification flow. Never fails: every outcome maps to an
    /// acknowledgment body.
    pub async fn handle_notification<I, K, V>(&self, pairs: I) -> NotificationReply
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let channel = CallbackChannel::ServerNotification;

        let fields = match self
            .validator
            .validate(pairs)
            .and_then(|validation| validation.into_fields())
        {
            Ok(fields) => fields,
            Err(e) => {
                warn!(channel = %channel, reason = e.reason(), error = %e, "Callback rejected");
                return NotificationReply::final_ack(e.gateway_ack());
            }
        };

        match self.reconcile(&fields, channel).await {
            Ok(outcome) if outcome.applied => NotificationReply::final_ack(GatewayAck::confirmed()),
            Ok(_) => NotificationReply::final_ack(GatewayAck::already_confirmed()),
            Err(e) => NotificationReply {
                ack: e.gateway_ack(),
                retryable: e.is_retryable(),
            },
        }
    }

    /// Full browser return flow. A bad signature is an error here since the
    /// caller is a customer's browser, not the gateway.
    pub async fn handle_browser_return<I, K, V>(&self, pairs: I) -> PaymentResult<ReturnOutcome>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let channel = CallbackChannel::BrowserReturn;

        let fields = self
            .validator
            .validate(pairs)
            .and_then(|validation| validation.into_fields())
            .map_err(|e| {
                warn!(channel = %channel, reason = e.reason(), error = %e, "Callback rejected");
                e
            })?;

        let outcome = self.reconcile(&fields, channel).await?;
        let status = outcome.order.status;

        Ok(ReturnOutcome {
            success: status == PaymentStatus::Completed,
            order_id: outcome.order.order_id,
            status,
            amount_minor: outcome.order.amount_minor,
            message: describe_response_code(&fields.response_code).to_string(),
            code: fields.response_code,
        })
    }

    async fn grant_entitlement(&self, order: &PaymentOrder) -> bool {
        if order.status != PaymentStatus::Completed {
            return false;
        }
        let Some(owner_ref) = order.owner_ref.as_deref() else {
            info!(order_id = %order.order_id, "Guest order completed, no entitlement to grant");
            return false;
        };

        match self
            .entitlements
            .grant_on_payment(owner_ref, &order.order_id)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                // The transition is already committed; later deliveries replay
                // and will not grant again.
                error!(
                    order_id = %order.order_id,
                    owner_ref = %owner_ref,
                    error = %e,
                    "ANOMALY: entitlement grant failed for completed order"
                );
                false
            }
        }
    }

    fn reject(&self, channel: CallbackChannel, err: PaymentError) -> PaymentError {
        let order_id = match &err {
            PaymentError::OrderNotFound { order_id }
            | PaymentError::OrderExpired { order_id }
            | PaymentError::AmountMismatch { order_id, .. }
            | PaymentError::Conflict { order_id, .. } => order_id.as_str(),
            _ => "",
        };

        match &err {
            PaymentError::Conflict { .. } => {
                error!(order_id = %order_id, channel = %channel, reason = err.reason(), error = %err, "ANOMALY: callback contradicts settled order");
            }
            PaymentError::TransientStoreFailure { .. } => {
                error!(order_id = %order_id, channel = %channel, reason = err.reason(), error = %err, "Ledger unavailable during reconciliation");
            }
            PaymentError::StoreFailure { .. } => {
                error!(order_id = %order_id, channel = %channel, reason = err.reason(), error = %err, "ANOMALY: ledger rejected callback permanently");
            }
            _ => {
                warn!(order_id = %order_id, channel = %channel, reason = err.reason(), "Callback rejected");
            }
        }

        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ledger::InMemoryLedger;
    use crate::payments::signer::{HashSecret, Signer};
    use crate::payments::types::NewPaymentOrder;
    use crate::services::entitlement::LoggingEntitlementService;
    use chrono::{Duration, FixedOffset};

    fn coordinator(ledger: Arc<InMemoryLedger>) -> ReconciliationCoordinator {
        ReconciliationCoordinator::new(
            CallbackValidator::new(
                Signer::new(HashSecret::new("test-secret")),
                FixedOffset::east_opt(7 * 3600).expect("offset"),
            ),
            ledger,
            Arc::new(LoggingEntitlementService::new()),
        )
    }

    async fn seeded(order_id: &str, expires_in: Duration) -> Arc<InMemoryLedger> {
        let ledger = Arc::new(InMemoryLedger::new());
        let now = Utc::now();
        ledger
            .create(NewPaymentOrder {
                order_id: order_id.to_string(),
                owner_ref: Some("user-1".to_string()),
                amount_minor: 50_000,
                order_info: "Premium upgrade".to_string(),
                created_at: now,
                expires_at: now + expires_in,
            })
            .await
            .expect("seed order");
        ledger
    }

    fn fields(order_id: &str, code: &str, amount_minor: i64) -> CallbackFields {
        CallbackFields {
            order_id: order_id.to_string(),
            response_code: code.to_string(),
            amount_minor,
            external_txn_ref: Some("14000001".to_string()),
            pay_timestamp: None,
            transaction_status: Some(code.to_string()),
            bank_code: None,
        }
    }

    #[tokio::test]
    async fn expired_order_refuses_success_but_accepts_failure() {
        let ledger = seeded("PAY1", Duration::minutes(-1)).await;
        let coordinator = coordinator(ledger.clone());

        let err = coordinator
            .reconcile(&fields("PAY1", "00", 50_000), CallbackChannel::ServerNotification)
            .await
            .expect_err("expired");
        assert_eq!(err.reason(), "order_expired");

        let outcome = coordinator
            .reconcile(&fields("PAY1", "11", 50_000), CallbackChannel::ServerNotification)
            .await
            .expect("failure callback");
        assert!(outcome.applied);
        assert_eq!(outcome.order.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn guest_order_completes_without_entitlement() {
        let ledger = Arc::new(InMemoryLedger::new());
        let now = Utc::now();
        ledger
            .create(NewPaymentOrder {
                order_id: "GUEST1".to_string(),
                owner_ref: None,
                amount_minor: 50_000,
                order_info: "Guest".to_string(),
                created_at: now,
                expires_at: now + Duration::minutes(15),
            })
            .await
            .expect("seed");

        let outcome = coordinator(ledger)
            .reconcile(&fields("GUEST1", "00", 50_000), CallbackChannel::BrowserReturn)
            .await
            .expect("reconcile");
        assert!(outcome.applied);
        assert!(!outcome.entitlement_granted);
    }

    #[tokio::test]
    async fn bad_signature_notification_gets_97_without_retry() {
        let ledger = seeded("PAY1", Duration::minutes(15)).await;
        let reply = coordinator(ledger.clone())
            .handle_notification(vec![
                ("vnp_TxnRef", "PAY1"),
                ("vnp_ResponseCode", "00"),
                ("vnp_Amount", "5000000"),
                ("vnp_SecureHash", "deadbeef"),
            ])
            .await;
        assert_eq!(reply.ack.code, "97");
        assert!(!reply.retryable);

        let order = ledger.find_by_order_id("PAY1").await.expect("lookup").expect("order");
        assert_eq!(order.status, PaymentStatus::Pending);
    }
}
