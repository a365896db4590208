//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store, gateways, event bus, orchestrator
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use storefront_auth::Hs256JwtValidator;
use storefront_infra::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub const DEV_JWT_SECRET: &str = "dev-secret";

/// Build the full router from configuration (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let jwt_secret = match &config.jwt_secret {
        Some(secret) => secret.clone(),
        None => {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        }
    };

    let services = services::build_services(config).await?;
    Ok(build_app_with(services, &jwt_secret))
}

/// Build the router over already wired services.
pub fn build_app_with(services: services::AppServices, jwt_secret: &str) -> Router {
    let jwt = Arc::new(Hs256JwtValidator::new(jwt_secret));
    let auth_state = middleware::AuthState { jwt };
    let services = Arc::new(services);

    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::webhook_router())
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
