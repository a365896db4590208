//! Provider webhooks. The raw body is handed to signature verification
//! before anything is parsed.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;

use storefront_infra::ServiceResult;
use storefront_infra::services::WebhookOutcome;

use crate::app::errors;
use crate::app::services::AppServices;

const STRIPE_SIGNATURE: &str = "stripe-signature";
const PAYSTACK_SIGNATURE: &str = "x-paystack-signature";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// 2xx for applied and ignored events so providers stop retrying; storage
/// failures answer 5xx so they retry later.
fn acknowledge(result: ServiceResult<WebhookOutcome>) -> Response {
    match result {
        Ok(WebhookOutcome::Applied { order_id }) => (
            StatusCode::OK,
            Json(json!({ "received": true, "applied": true, "orderId": order_id.to_string() })),
        )
            .into_response(),
        Ok(WebhookOutcome::Ignored { reason }) => (
            StatusCode::OK,
            Json(json!({ "received": true, "applied": false, "reason": reason })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn stripe(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header(&headers, STRIPE_SIGNATURE);
    acknowledge(services.commerce.payments.stripe_webhook(signature, &body).await)
}

pub async fn paystack(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header(&headers, PAYSTACK_SIGNATURE);
    acknowledge(services.commerce.payments.paystack_webhook(signature, &body).await)
}
