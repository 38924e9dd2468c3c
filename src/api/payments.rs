//! Payment endpoints: request creation, both gateway callbacks, order lookups.

use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::logging::mask_identifier;
use crate::middleware::error::{get_request_id_from_headers, json_error_response};
use crate::payments::request_builder::PaymentRequestBuilder;
use crate::payments::types::{CreatePaymentRequest, PaymentOrder};
use crate::services::payment_orders::PaymentOrderService;
use crate::services::reconciliation::{ReconciliationCoordinator, ReturnOutcome};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Form, Path, Query, State},
    http::{Extensions, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub const OWNER_HEADER: &str = "x-owner-ref";

pub struct PaymentState {
    pub builder: Arc<PaymentRequestBuilder>,
    pub coordinator: Arc<ReconciliationCoordinator>,
    pub orders: PaymentOrderService,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub amount_minor: i64,
    pub order_info: String,
    pub order_id: Option<String>,
    pub bank_code: Option<String>,
    pub locale: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePaymentResponse {
    pub order_id: String,
    pub payment_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub external_ref: Option<String>,
}

/// Routes under `/api/payments`.
pub fn router(state: Arc<PaymentState>) -> Router {
    Router::new()
        .route("/api/payments", axum::routing::post(create_payment))
        .route("/api/payments/return", get(payment_return))
        .route(
            "/api/payments/ipn",
            get(payment_notification).post(payment_notification_form),
        )
        .route("/api/payments/orders", get(list_orders))
        .route("/api/payments/orders/{order_id}", get(get_order))
        .with_state(state)
}

/// POST /api/payments
pub async fn create_payment(
    State(state): State<Arc<PaymentState>>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Result<Json<CreatePaymentBody>, JsonRejection>,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return json_error_response(rejection.status(), rejection.body_text(), request_id)
                .into_response()
        }
    };

    let client_ip = client_ip(&headers, &extensions).unwrap_or_default();
    let owner_ref = owner_ref(&headers);

    info!(
        amount_minor = body.amount_minor,
        client_ip = %mask_identifier(&client_ip),
        "Payment request received"
    );

    let request = CreatePaymentRequest {
        amount_minor: body.amount_minor,
        order_info: body.order_info,
        order_id: body.order_id,
        client_ip,
        bank_code: body.bank_code,
        locale: body.locale,
        owner_ref,
    };

    match state.builder.build(request).await {
        Ok(outbound) => (
            StatusCode::CREATED,
            Json(CreatePaymentResponse {
                order_id: outbound.order_id,
                payment_url: outbound.payment_url,
                expires_at: outbound.expires_at,
            }),
        )
            .into_response(),
        Err(e) => with_request_id(AppError::from(e), request_id).into_response(),
    }
}

/// GET /api/payments/return
pub async fn payment_return(
    State(state): State<Arc<PaymentState>>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ReturnOutcome>, AppError> {
    state
        .coordinator
        .handle_browser_return(pairs)
        .await
        .map(Json)
        .map_err(|e| with_request_id(AppError::from(e), get_request_id_from_headers(&headers)))
}

/// GET /api/payments/ipn
///
/// Always answers 200 with the acknowledgment body, except when the ledger
/// is unavailable: then a 503 makes the gateway redeliver.
pub async fn payment_notification(
    State(state): State<Arc<PaymentState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let reply = state.coordinator.handle_notification(pairs).await;
    let status = if reply.retryable {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(reply.ack)).into_response()
}

/// POST /api/payments/ipn, fields in a form body or the query string.
pub async fn payment_notification_form(
    state: State<Arc<PaymentState>>,
    Query(query): Query<Vec<(String, String)>>,
    form: Result<Form<Vec<(String, String)>>, axum::extract::rejection::FormRejection>,
) -> Response {
    let pairs = match form {
        Ok(Form(pairs)) if !pairs.is_empty() => pairs,
        _ => query,
    };
    payment_notification(state, Query(pairs)).await
}

/// GET /api/payments/orders/{order_id}
pub async fn get_order(
    State(state): State<Arc<PaymentState>>,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentOrder>, AppError> {
    state
        .orders
        .find_by_order_id(&order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::new(AppErrorKind::Domain(DomainError::OrderNotFound { order_id })))
}

/// GET /api/payments/orders, the caller's own orders, or ?external_ref=...
pub async fn list_orders(
    State(state): State<Arc<PaymentState>>,
    headers: HeaderMap,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Vec<PaymentOrder>>, AppError> {
    if let Some(external_ref) = query.external_ref.as_deref().filter(|v| !v.is_empty()) {
        let order = state.orders.find_by_external_ref(external_ref).await?;
        return Ok(Json(order.into_iter().collect()));
    }

    let owner_ref = owner_ref(&headers).ok_or_else(|| {
        AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: OWNER_HEADER.to_string(),
        }))
    })?;

    Ok(Json(state.orders.list_by_owner(&owner_ref).await?))
}

/// Principal set by the upstream auth layer.
fn owner_ref(headers: &HeaderMap) -> Option<String> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// First `X-Forwarded-For` hop, else the socket peer.
fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

fn with_request_id(error: AppError, request_id: Option<String>) -> AppError {
    match request_id {
        Some(id) => error.with_request_id(id),
        None => error,
    }
}
