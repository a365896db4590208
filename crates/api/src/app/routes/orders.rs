use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};

use storefront_auth::Permission;
use storefront_orders::OrderId;

use crate::app::dto::{self, CreateOrderRequest, OrderResponse, UpdateStatusRequest};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::AuthContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/status", patch(update_status))
}

fn order_id(raw: &str) -> Result<OrderId, Response> {
    dto::parse_field(raw, "invalid_id")
}

/// Checkout: turns the caller's cart into an order.
pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateOrderRequest>,
) -> Response {
    let command = match body.into_command() {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.commerce.orders.create_order(ctx.user_id(), command).await {
        Ok(order) => (StatusCode::CREATED, Json(OrderResponse::from(&order))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    match services.commerce.orders.list(ctx.user_id()).await {
        Ok(orders) => {
            let body: Vec<OrderResponse> = orders.iter().map(OrderResponse::from).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Response {
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let read_any = ctx.can(&Permission::ORDERS_READ_ANY);
    match services.commerce.orders.get(ctx.user_id(), id, read_any).await {
        Ok(order) => (StatusCode::OK, Json(OrderResponse::from(&order))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Response {
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let manage_any = ctx.can(&Permission::ORDERS_MANAGE);
    match services.commerce.orders.cancel(ctx.user_id(), id, manage_any).await {
        Ok(order) => (StatusCode::OK, Json(OrderResponse::from(&order))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Staff only.
pub async fn update_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> Response {
    if let Err(e) = crate::authz::authorize_command(&ctx, &body) {
        return errors::forbidden(e);
    }
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let status = match body.status() {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match services
        .commerce
        .orders
        .change_status(id, status, body.tracking_number)
        .await
    {
        Ok(order) => (StatusCode::OK, Json(OrderResponse::from(&order))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
