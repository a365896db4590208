use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde_json::json;

use storefront_catalog::ProductId;

use crate::app::dto::{self, AddItemRequest, ApplyCouponRequest, CartResponse, CartSummaryResponse, UpdateItemRequest};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::AuthContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/summary", get(summary))
        .route("/validate", get(validate))
        .route("/items", post(add_item))
        .route("/items/:product_id", put(update_item).delete(remove_item))
        .route("/coupon", post(apply_coupon).delete(remove_coupon))
        .route("/sync", post(sync_prices))
}

fn cart_json(cart: &storefront_cart::Cart) -> Response {
    (StatusCode::OK, Json(CartResponse::from(cart))).into_response()
}

pub async fn get_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    match services.commerce.carts.get(ctx.user_id()).await {
        Ok(cart) => cart_json(&cart),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    match services.commerce.carts.summary(ctx.user_id()).await {
        Ok(summary) => (StatusCode::OK, Json(CartSummaryResponse::from(summary))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Corrections are saved; the response says what changed.
pub async fn validate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    match services.commerce.carts.validate(ctx.user_id()).await {
        Ok((cart, validation)) => (
            StatusCode::OK,
            Json(json!({
                "valid": validation.valid,
                "issues": validation.issues,
                "cart": CartResponse::from(&cart),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn add_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<AddItemRequest>,
) -> Response {
    let product_id: ProductId = match dto::parse_field(&body.product_id, "invalid_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.commerce.carts.add_item(ctx.user_id(), product_id, body.quantity).await {
        Ok(cart) => cart_json(&cart),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Quantity 0 removes the line.
pub async fn update_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(product_id): Path<String>,
    Json(body): Json<UpdateItemRequest>,
) -> Response {
    let product_id: ProductId = match dto::parse_field(&product_id, "invalid_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.commerce.carts.update_item(ctx.user_id(), product_id, body.quantity).await {
        Ok(cart) => cart_json(&cart),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn remove_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Path(product_id): Path<String>,
) -> Response {
    let product_id: ProductId = match dto::parse_field(&product_id, "invalid_id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.commerce.carts.remove_item(ctx.user_id(), product_id).await {
        Ok(cart) => cart_json(&cart),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn clear_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    match services.commerce.carts.clear(ctx.user_id()).await {
        Ok(cart) => cart_json(&cart),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn apply_coupon(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<ApplyCouponRequest>,
) -> Response {
    if body.code.trim().is_empty() {
        return errors::bad_request("validation_error", "code is required");
    }
    match services.commerce.carts.apply_coupon(ctx.user_id(), &body.code).await {
        Ok((cart, discount)) => (
            StatusCode::OK,
            Json(json!({
                "discount": discount.minor(),
                "cart": CartResponse::from(&cart),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn remove_coupon(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    match services.commerce.carts.remove_coupon(ctx.user_id()).await {
        Ok(cart) => cart_json(&cart),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn sync_prices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    match services.commerce.carts.sync_prices(ctx.user_id()).await {
        Ok((cart, updated)) => (
            StatusCode::OK,
            Json(json!({
                "updated": updated,
                "cart": CartResponse::from(&cart),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
