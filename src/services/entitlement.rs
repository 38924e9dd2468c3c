//! Account entitlement granted when a payment completes.

use crate::database::error::DatabaseError;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};

#[async_trait]
pub trait EntitlementService: Send + Sync {
    /// Grants the paid entitlement to `owner_ref`. Granting twice for the same
    /// order must leave the account unchanged.
    async fn grant_on_payment(&self, owner_ref: &str, order_id: &str) -> Result<(), DatabaseError>;
}

/// Flips the premium flag on the owner's user row.
pub struct PgEntitlementService {
    pool: PgPool,
}

impl PgEntitlementService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementService for PgEntitlementService {
    async fn grant_on_payment(&self, owner_ref: &str, order_id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE users
             SET is_premium = TRUE, premium_order_id = $2, premium_since = NOW()
             WHERE id::text = $1 AND premium_order_id IS DISTINCT FROM $2",
        )
        .bind(owner_ref)
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            warn!(
                owner_ref = %owner_ref,
                order_id = %order_id,
                "Entitlement unchanged: owner missing or already granted for this order"
            );
        } else {
            info!(owner_ref = %owner_ref, order_id = %order_id, "Premium entitlement granted");
        }

        Ok(())
    }
}

/// Records grants in the log only. Used when running without a database.
#[derive(Debug, Default)]
pub struct LoggingEntitlementService;

impl LoggingEntitlementService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EntitlementService for LoggingEntitlementService {
    async fn grant_on_payment(&self, owner_ref: &str, order_id: &str) -> Result<(), DatabaseError> {
        info!(
            owner_ref = %owner_ref,
            order_id = %order_id,
            "ENTITLEMENT: premium granted"
        );
        Ok(())
    }
}
