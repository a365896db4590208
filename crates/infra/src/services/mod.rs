//! The order/payment orchestrator.
//!
//! - [`CartService`]: cart mutations (last-writer-wins, no transaction).
//! - [`OrderService`]: the create-order transaction, cancellation, admin status
//!   changes, and the shared version-checked transition used by every later
//!   order write (stock restoration happens inside it).
//! - [`PaymentService`]: provider initiation, confirmation, webhooks, refunds.
//!   Provider calls never run while a store transaction is open.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use storefront_core::DomainError;
use storefront_events::{EventBus, EventEnvelope};
use storefront_payments::PaymentProviderError;

use crate::store::{CommerceStore, StoreError};

pub mod cart;
pub mod orders;
pub mod payments;

pub use cart::CartService;
pub use orders::{CreateOrder, OrderService};
pub use payments::{
    ConfirmPayment, CreatePayment, PaymentConfirmation, PaymentService, RefundOrder,
    WebhookOutcome, WebhookSecrets,
};

pub type SharedStore = Arc<dyn CommerceStore>;
pub type SharedBus = Arc<dyn EventBus<EventEnvelope<JsonValue>>>;

/// Orchestrator error: one of the three underlying taxonomies.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Payment(#[from] PaymentProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::Domain(e) => e.http_status(),
            ServiceError::Payment(e) => e.http_status(),
            ServiceError::Store(StoreError::NotFound(_)) => 404,
            ServiceError::Store(StoreError::Concurrency(_) | StoreError::Duplicate(_)) => 409,
            ServiceError::Store(StoreError::InsufficientStock { .. } | StoreError::CouponExhausted(_)) => 409,
            ServiceError::Store(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Domain(e) => e.code(),
            ServiceError::Payment(e) => e.code(),
            ServiceError::Store(StoreError::NotFound(_)) => "not_found",
            ServiceError::Store(StoreError::Concurrency(_) | StoreError::Duplicate(_)) => "conflict",
            ServiceError::Store(StoreError::InsufficientStock { .. }) => "insufficient_stock",
            ServiceError::Store(StoreError::CouponExhausted(_)) => "coupon_usage_limit_reached",
            ServiceError::Store(_) => "store_error",
        }
    }
}

/// All three services over one store, gateway set and bus.
#[derive(Clone)]
pub struct Orchestrator {
    pub carts: CartService,
    pub orders: OrderService,
    pub payments: PaymentService,
}

impl Orchestrator {
    pub fn new(
        store: SharedStore,
        gateways: storefront_payments::GatewayRegistry,
        bus: SharedBus,
        cart_ttl: chrono::Duration,
    ) -> Self {
        let orders = OrderService::new(store.clone(), bus);
        Self {
            carts: CartService::new(store.clone(), cart_ttl),
            payments: PaymentService::new(store, gateways, orders.clone()),
            orders,
        }
    }

    pub fn with_webhook_secrets(mut self, secrets: WebhookSecrets) -> Self {
        self.payments = self.payments.with_webhook_secrets(secrets);
        self
    }
}
