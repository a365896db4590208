//! Payment gateway adapters.
//!
//! One [`PaymentGateway`] implementation per provider, selected at runtime
//! through a [`GatewayRegistry`] keyed by [`PaymentProvider`]. The orchestrator
//! only ever talks to the trait, so adding a provider does not touch it.
//!
//! Webhook payloads are authenticated and normalised in [`webhook`] before
//! anything inside them is trusted.

pub mod cod;
pub mod error;
pub mod gateway;
pub mod paystack;
pub mod registry;
pub mod stripe;
pub mod webhook;

pub use cod::CodGateway;
pub use error::PaymentProviderError;
pub use gateway::{
    PaymentGateway, PaymentRequest, PaymentSession, PaymentVerification, RefundRequest,
    RefundResult,
};
pub use paystack::{PaystackConfig, PaystackGateway};
pub use registry::GatewayRegistry;
pub use storefront_orders::PaymentProvider;
pub use stripe::{StripeConfig, StripeGateway};
pub use webhook::{ProviderRefund, WebhookEvent};
