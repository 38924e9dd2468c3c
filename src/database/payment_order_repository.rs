use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::ledger::{ensure_terminal_target, PaymentLedger, Transition};
use crate::payments::types::{NewPaymentOrder, PaymentOrder, PaymentStatus};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::warn;

/// Row shape of the `payment_orders` table
#[derive(Debug, Clone, FromRow)]
pub struct PaymentOrderRow {
    pub order_id: String,
    pub owner_ref: Option<String>,
    pub amount_minor: i64,
    pub order_info: String,
    pub status: String,
    pub response_code: Option<String>,
    pub external_txn_ref: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PaymentOrderRow> for PaymentOrder {
    type Error = DatabaseError;

    fn try_from(row: PaymentOrderRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::from_str(&row.status).map_err(|e| {
            DatabaseError::new(DatabaseErrorKind::Decode {
                message: e.to_string(),
            })
        })?;

        Ok(PaymentOrder {
            order_id: row.order_id,
            owner_ref: row.owner_ref,
            amount_minor: row.amount_minor,
            order_info: row.order_info,
            status,
            response_code: row.response_code,
            external_txn_ref: row.external_txn_ref,
            created_at: row.created_at,
            expires_at: row.expires_at,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "order_id, owner_ref, amount_minor, order_info, status, response_code, \
                       external_txn_ref, created_at, expires_at, updated_at";

/// Postgres-backed payment ledger
pub struct PaymentOrderRepository {
    pool: PgPool,
}

impl PaymentOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        key: &str,
    ) -> Result<Option<PaymentOrder>, DatabaseError> {
        sqlx::query_as::<_, PaymentOrderRow>(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentOrder::try_from)
            .transpose()
    }
}

#[async_trait]
impl PaymentLedger for PaymentOrderRepository {
    async fn create(&self, order: NewPaymentOrder) -> Result<PaymentOrder, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentOrderRow>(&format!(
            "INSERT INTO payment_orders
             (order_id, owner_ref, amount_minor, order_info, status, created_at, expires_at, updated_at)
             VALUES ($1, $2, $3, $4, 'pending', $5, $6, $5)
             RETURNING {}",
            COLUMNS
        ))
        .bind(&order.order_id)
        .bind(&order.owner_ref)
        .bind(order.amount_minor)
        .bind(&order.order_info)
        .bind(order.created_at)
        .bind(order.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        PaymentOrder::try_from(row)
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<PaymentOrder>, DatabaseError> {
        self.fetch_optional(
            &format!("SELECT {} FROM payment_orders WHERE order_id = $1", COLUMNS),
            order_id,
        )
        .await
    }

    async fn find_by_external_ref(
        &self,
        external_txn_ref: &str,
    ) -> Result<Option<PaymentOrder>, DatabaseError> {
        self.fetch_optional(
            &format!(
                "SELECT {} FROM payment_orders WHERE external_txn_ref = $1",
                COLUMNS
            ),
            external_txn_ref,
        )
        .await
    }

    async fn list_by_owner(&self, owner_ref: &str) -> Result<Vec<PaymentOrder>, DatabaseError> {
        sqlx::query_as::<_, PaymentOrderRow>(&format!(
            "SELECT {} FROM payment_orders WHERE owner_ref = $1 ORDER BY created_at DESC",
            COLUMNS
        ))
        .bind(owner_ref)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .into_iter()
        .map(PaymentOrder::try_from)
        .collect()
    }

    async fn transition_to(
        &self,
        order_id: &str,
        target: PaymentStatus,
        external_txn_ref: Option<&str>,
        response_code: Option<&str>,
    ) -> Result<Transition, DatabaseError> {
        ensure_terminal_target(target)?;

        // The WHERE clause is the race arbiter: exactly one caller sees a row back.
        let updated = sqlx::query_as::<_, PaymentOrderRow>(&format!(
            "UPDATE payment_orders
             SET status = $2,
                 external_txn_ref = COALESCE(external_txn_ref, $3),
                 response_code = $4,
                 updated_at = NOW()
             WHERE order_id = $1 AND status = 'pending'
             RETURNING {}",
            COLUMNS
        ))
        .bind(order_id)
        .bind(target.as_str())
        .bind(external_txn_ref)
        .bind(response_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(row) = updated {
            return Ok(Transition::Applied(PaymentOrder::try_from(row)?));
        }

        let current = self
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("payment_order", order_id))?;

        if current.status == PaymentStatus::Pending {
            warn!(order_id = %order_id, "Conditional update missed a pending order");
            return Err(DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("order {} still pending after conditional update", order_id),
            }));
        }

        Ok(Transition::unapplied(current, target))
    }
}
