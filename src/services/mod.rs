//! Services module for business logic and integrations

pub mod entitlement;
pub mod payment_orders;
pub mod reconciliation;

pub use entitlement::{EntitlementService, LoggingEntitlementService, PgEntitlementService};
pub use payment_orders::PaymentOrderService;
pub use reconciliation::{
    NotificationReply, ReconcileOutcome, ReconciliationCoordinator, ReturnOutcome,
};
