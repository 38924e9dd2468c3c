//! Read-only view of the ledger for reporting and account pages.

use crate::database::ledger::PaymentLedger;
use crate::payments::error::PaymentResult;
use crate::payments::types::PaymentOrder;
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct PaymentOrderService {
    ledger: Arc<dyn PaymentLedger>,
}

impl PaymentOrderService {
    pub fn new(ledger: Arc<dyn PaymentLedger>) -> Self {
        Self { ledger }
    }

    /// Pending orders past their expiry come back as `expired`.
    pub async fn find_by_order_id(&self, order_id: &str) -> PaymentResult<Option<PaymentOrder>> {
        let now = Utc::now();
        Ok(self
            .ledger
            .find_by_order_id(order_id)
            .await?
            .map(|order| order.reported_at(now)))
    }

    pub async fn find_by_external_ref(
        &self,
        external_txn_ref: &str,
    ) -> PaymentResult<Option<PaymentOrder>> {
        let now = Utc::now();
        Ok(self
            .ledger
            .find_by_external_ref(external_txn_ref)
            .await?
            .map(|order| order.reported_at(now)))
    }

    pub async fn list_by_owner(&self, owner_ref: &str) -> PaymentResult<Vec<PaymentOrder>> {
        let now = Utc::now();
        Ok(self
            .ledger
            .list_by_owner(owner_ref)
            .await?
            .into_iter()
            .map(|order| order.reported_at(now))
            .collect())
    }
}
