//! Transaction ledger: durable record of payment orders and their lifecycle.
//!
//! `transition_to` is the only mutation after creation and is the single
//! serialization point for racing callbacks. Implementations must apply it as
//! one atomic conditional write on `status = 'pending'`.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::payments::types::{NewPaymentOrder, PaymentOrder, PaymentStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

/// Outcome of a conditional status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The order was pending and now holds the target status.
    Applied(PaymentOrder),
    /// The order already held the target status; nothing changed.
    Replayed(PaymentOrder),
    /// The order is terminal in the other state; nothing changed.
    Conflict(PaymentOrder),
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn order(&self) -> &PaymentOrder {
        match self {
            Transition::Applied(order) | Transition::Replayed(order) | Transition::Conflict(order) => {
                order
            }
        }
    }

    pub fn into_order(self) -> PaymentOrder {
        match self {
            Transition::Applied(order) | Transition::Replayed(order) | Transition::Conflict(order) => {
                order
            }
        }
    }

    /// Classifies an order that the conditional write did not touch.
    pub fn unapplied(current: PaymentOrder, target: PaymentStatus) -> Self {
        if current.status == target {
            Transition::Replayed(current)
        } else {
            Transition::Conflict(current)
        }
    }
}

#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Persists a new pending order. Fails with a unique violation on a reused `order_id`.
    async fn create(&self, order: NewPaymentOrder) -> Result<PaymentOrder, DatabaseError>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PaymentOrder>, DatabaseError>;

    async fn find_by_external_ref(
        &self,
        external_txn_ref: &str,
    ) -> Result<Option<PaymentOrder>, DatabaseError>;

    /// Orders of one owner, newest first.
    async fn list_by_owner(&self, owner_ref: &str) -> Result<Vec<PaymentOrder>, DatabaseError>;

    async fn transition_to(
        &self,
        order_id: &str,
        target: PaymentStatus,
        external_txn_ref: Option<&str>,
        response_code: Option<&str>,
    ) -> Result<Transition, DatabaseError>;
}

pub(crate) fn ensure_terminal_target(target: PaymentStatus) -> Result<(), DatabaseError> {
    if target.is_terminal() {
        Ok(())
    } else {
        Err(DatabaseError::new(DatabaseErrorKind::Unknown {
            message: format!("{} is not a valid transition target", target),
        }))
    }
}

/// Process-local ledger. One lock guards the whole map, so every
/// read-modify-write below is serialized.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    orders: Mutex<HashMap<String, PaymentOrder>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, PaymentOrder>>, DatabaseError> {
        self.orders.lock().map_err(|_| {
            DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "in-memory ledger lock poisoned".to_string(),
            })
        })
    }
}

#[async_trait]
impl PaymentLedger for InMemoryLedger {
    async fn create(&self, order: NewPaymentOrder) -> Result<PaymentOrder, DatabaseError> {
        let mut orders = self.lock()?;
        if orders.contains_key(&order.order_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: Some("payment_orders_order_id_key".to_string()),
            }));
        }
        let order = order.into_pending();
        orders.insert(order.order_id.clone(), order.clone());
        Ok(order)
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PaymentOrder>, DatabaseError> {
        Ok(self.lock()?.get(order_id).cloned())
    }

    async fn find_by_external_ref(
        &self,
        external_txn_ref: &str,
    ) -> Result<Option<PaymentOrder>, DatabaseError> {
        Ok(self
            .lock()?
            .values()
            .find(|order| order.external_txn_ref.as_deref() == Some(external_txn_ref))
            .cloned())
    }

    async fn list_by_owner(&self, owner_ref: &str) -> Result<Vec<PaymentOrder>, DatabaseError> {
        let mut orders: Vec<PaymentOrder> = self
            .lock()?
            .values()
            .filter(|order| order.owner_ref.as_deref() == Some(owner_ref))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn transition_to(
        &self,
        order_id: &str,
        target: PaymentStatus,
        external_txn_ref: Option<&str>,
        response_code: Option<&str>,
    ) -> Result<Transition, DatabaseError> {
        ensure_terminal_target(target)?;

        let mut orders = self.lock()?;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| DatabaseError::not_found("payment_order", order_id))?;

        if order.status != PaymentStatus::Pending {
            return Ok(Transition::unapplied(order.clone(), target));
        }

        order.status = target;
        if order.external_txn_ref.is_none() {
            order.external_txn_ref = external_txn_ref.map(str::to_string);
        }
        order.response_code = response_code.map(str::to_string);
        order.updated_at = Utc::now();
        Ok(Transition::Applied(order.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_order(order_id: &str, owner: Option<&str>) -> NewPaymentOrder {
        let now = Utc::now();
        NewPaymentOrder {
            order_id: order_id.to_string(),
            owner_ref: owner.map(str::to_string),
            amount_minor: 299_000,
            order_info: "Premium upgrade".to_string(),
            created_at: now,
            expires_at: now + Duration::minutes(15),
        }
    }

    #[tokio::test]
    async fn create_rejects_reused_order_id() {
        let ledger = InMemoryLedger::new();
        ledger.create(new_order("PAY1", None)).await.expect("first insert");
        let err = ledger
            .create(new_order("PAY1", None))
            .await
            .expect_err("second insert must fail");
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn transition_applies_once_then_replays() {
        let ledger = InMemoryLedger::new();
        ledger.create(new_order("PAY1", None)).await.expect("insert");

        let first = ledger
            .transition_to("PAY1", PaymentStatus::Completed, Some("1400001"), Some("00"))
            .await
            .expect("transition");
        assert!(first.applied());
        assert_eq!(first.order().status, PaymentStatus::Completed);
        assert_eq!(first.order().external_txn_ref.as_deref(), Some("1400001"));

        let second = ledger
            .transition_to("PAY1", PaymentStatus::Completed, Some("1400002"), Some("00"))
            .await
            .expect("transition");
        assert!(matches!(second, Transition::Replayed(_)));
        assert_eq!(second.order().external_txn_ref.as_deref(), Some("1400001"));
    }

    #[tokio::test]
    async fn opposite_terminal_state_is_a_conflict() {
        let ledger = InMemoryLedger::new();
        ledger.create(new_order("PAY1", None)).await.expect("insert");
        ledger
            .transition_to("PAY1", PaymentStatus::Completed, Some("1"), Some("00"))
            .await
            .expect("transition");

        let outcome = ledger
            .transition_to("PAY1", PaymentStatus::Failed, Some("1"), Some("24"))
            .await
            .expect("transition");
        assert!(matches!(outcome, Transition::Conflict(_)));
        assert_eq!(outcome.order().status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let ledger = InMemoryLedger::new();
        let err = ledger
            .transition_to("missing", PaymentStatus::Completed, None, None)
            .await
            .expect_err("must fail");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn pending_is_not_a_transition_target() {
        let ledger = InMemoryLedger::new();
        ledger.create(new_order("PAY1", None)).await.expect("insert");
        assert!(ledger
            .transition_to("PAY1", PaymentStatus::Pending, None, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn lookups_by_external_ref_and_owner() {
        let ledger = InMemoryLedger::new();
        ledger.create(new_order("PAY1", Some("user-1"))).await.expect("insert");
        ledger.create(new_order("PAY2", Some("user-1"))).await.expect("insert");
        ledger.create(new_order("PAY3", Some("user-2"))).await.expect("insert");
        ledger
            .transition_to("PAY2", PaymentStatus::Completed, Some("9988"), Some("00"))
            .await
            .expect("transition");

        let by_ref = ledger.find_by_external_ref("9988").await.expect("lookup");
        assert_eq!(by_ref.map(|o| o.order_id), Some("PAY2".to_string()));
        assert_eq!(ledger.list_by_owner("user-1").await.expect("list").len(), 2);
        assert!(ledger.list_by_owner("nobody").await.expect("list").is_empty());
    }
}
