//! Provider-neutral payment contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use storefront_core::{Money, UserId};
use storefront_orders::{Order, OrderId, PaymentProvider, PaymentStatus};

use crate::error::PaymentProviderError;

/// What a provider needs to start collecting money for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer: UserId,
    pub amount: Money,
    pub customer_email: Option<String>,
    pub callback_url: Option<String>,
}

impl PaymentRequest {
    pub fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id_typed(),
            order_number: order.number().to_string(),
            customer: order.owner(),
            amount: order.total(),
            customer_email: None,
            callback_url: None,
        }
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.customer_email = email;
        self
    }

    pub fn with_callback(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }
}

/// Provider handle returned by [`PaymentGateway::initiate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub provider: PaymentProvider,
    /// Stripe payment intent id, Paystack reference, or the order number for COD.
    pub provider_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Provider's current view of a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub provider_ref: String,
    /// Always one of `paid`, `failed` or `pending`.
    pub status: PaymentStatus,
    /// Order id echoed back from the metadata sent at initiation, if any.
    pub order_id: Option<OrderId>,
    pub amount: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub provider_ref: String,
    /// `None` refunds whatever the provider still holds.
    pub amount: Option<Money>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResult {
    pub refund_id: String,
    pub amount: Money,
    /// Provider's own status word (e.g. `succeeded`, `pending`, `processed`).
    pub status: String,
}

/// Uniform contract over every payment provider.
///
/// Implementations make at most one network round-trip per call and carry
/// their own timeout.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentSession, PaymentProviderError>;

    async fn verify(&self, provider_ref: &str) -> Result<PaymentVerification, PaymentProviderError>;

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResult, PaymentProviderError>;
}

/// Turn a non-2xx response into [`PaymentProviderError::Rejected`].
pub(crate) async fn ensure_success(
    provider: PaymentProvider,
    response: reqwest::Response,
) -> Result<reqwest::Response, PaymentProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or(text);

    Err(PaymentProviderError::Rejected {
        provider,
        status: status.as_u16(),
        message,
    })
}

/// Build the shared HTTP client with the per-call timeout.
pub(crate) fn http_client(
    provider: PaymentProvider,
    timeout: std::time::Duration,
) -> Result<reqwest::Client, PaymentProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PaymentProviderError::from_reqwest(provider, e))
}
