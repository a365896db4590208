use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use storefront_auth::AuthzError;
use storefront_core::DomainError;
use storefront_infra::ServiceError;

/// Orchestrator failures become `{"error": code, "message": ..}` with the
/// status their taxonomy assigns. Cart issues are also listed so clients can
/// re-render the cart.
pub fn service_error_to_response(err: ServiceError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }

    match &err {
        ServiceError::Domain(DomainError::CartInvalid(issues)) => (
            status,
            axum::Json(json!({
                "error": err.code(),
                "message": err.to_string(),
                "issues": issues,
            })),
        )
            .into_response(),
        _ => json_error(status, err.code(), err.to_string()),
    }
}

pub fn forbidden(err: AuthzError) -> Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}

pub fn bad_request(code: &'static str, message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, code, message)
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
