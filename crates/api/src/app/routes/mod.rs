use axum::{
    Router,
    routing::{get, post},
};

pub mod cart;
pub mod orders;
pub mod payments;
pub mod system;
pub mod webhooks;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/cart", cart::router())
        .nest("/orders", orders::router())
        .nest("/payments", payments::router())
}

/// Provider callbacks: authenticated by signature, not by bearer token.
pub fn webhook_router() -> Router {
    Router::new()
        .route("/payments/webhook/stripe", post(webhooks::stripe))
        .route("/payments/webhook/paystack", post(webhooks::paystack))
}
