use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use storefront_auth::Permission;
use storefront_orders::OrderId;

use crate::app::dto::{
    self, ConfirmPaymentRequest, ConfirmPaymentResponse, CreatePaymentRequest, PaymentStatusResponse,
    RefundRequest, RefundResultResponse,
};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::AuthContext;

pub fn router() -> Router {
    Router::new()
        .route("/providers", get(providers))
        .route("/create", post(create_payment))
        .route("/confirm", post(confirm_payment))
        .route("/status/:order_id", get(payment_status))
        .route("/refund", post(refund))
}

pub async fn providers(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let names: Vec<&str> = services
        .commerce
        .payments
        .providers()
        .into_iter()
        .map(|p| p.as_str())
        .collect();
    (StatusCode::OK, Json(json!({ "providers": names }))).into_response()
}

/// Start a payment with the chosen provider for one of the caller's orders.
pub async fn create_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreatePaymentRequest>,
) -> Response {
    let command = match body.into_command() {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let email = ctx.email().map(str::to_string);
    match services.commerce.payments.create(ctx.user_id(), email, command).await {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn confirm_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<ConfirmPaymentRequest>,
) -> Response {
    let command = match body.into_command() {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.commerce.payments.confirm(ctx.user_id(), command).await {
        Ok(confirmation) => (StatusCode::OK, Json(ConfirmPaymentResponse::from(&confirmation))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn payment_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(order_id): Path<String>,
) -> Response {
    let order_id: OrderId = match dto::parse_field(&order_id, "invalid_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let read_any = ctx.can(&Permission::ORDERS_READ_ANY);
    match services.commerce.payments.status(ctx.user_id(), order_id, read_any).await {
        Ok(order) => (StatusCode::OK, Json(PaymentStatusResponse::from(&order))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Staff only.
pub async fn refund(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<RefundRequest>,
) -> Response {
    if let Err(e) = crate::authz::authorize_command(&ctx, &body) {
        return errors::forbidden(e);
    }
    let command = match body.into_command() {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.commerce.payments.refund(command).await {
        Ok((result, order)) => (StatusCode::OK, Json(RefundResultResponse::new(&result, &order))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
