pub mod health;
pub mod payments;

use crate::health::HealthChecker;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

/// Full application router with request-id and logging layers.
pub fn build_router(payments: Arc<payments::PaymentState>, health_checker: HealthChecker) -> Router {
    Router::new()
        .merge(health::router(health_checker))
        .merge(payments::router(payments))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
