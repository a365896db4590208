//! Stripe Payment Intents adapter (form-encoded REST API).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use storefront_core::Money;
use storefront_orders::{PaymentProvider, PaymentStatus};

use crate::error::PaymentProviderError;
use crate::gateway::{
    PaymentGateway, PaymentRequest, PaymentSession, PaymentVerification, RefundRequest,
    RefundResult, ensure_success, http_client,
};

const PROVIDER: PaymentProvider = PaymentProvider::Stripe;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub currency: String,
    pub timeout: Duration,
}

/// Map a payment intent status onto the three-way payment vocabulary.
pub fn status_from_intent(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Paid,
        "canceled" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

#[derive(Debug, Clone)]
pub struct StripeGateway {
    config: StripeConfig,
    http: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentProviderError> {
        let http = http_client(PROVIDER, config.timeout)?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PaymentProviderError> {
        let response = request
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| PaymentProviderError::from_reqwest(PROVIDER, e))?;

        ensure_success(PROVIDER, response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| PaymentProviderError::malformed(PROVIDER, e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Intent {
    id: String,
    status: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    amount: Option<u64>,
    #[serde(default)]
    metadata: IntentMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct IntentMetadata {
    #[serde(rename = "orderId")]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    amount: u64,
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PROVIDER
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentSession, PaymentProviderError> {
        let form = [
            ("amount", request.amount.minor().to_string()),
            ("currency", self.config.currency.clone()),
            ("description", format!("Order {}", request.order_number)),
            ("metadata[orderId]", request.order_id.to_string()),
            ("metadata[orderNumber]", request.order_number.clone()),
            ("metadata[userId]", request.customer.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let intent: Intent = self
            .send(self.http.post(self.url("payment_intents")).form(&form))
            .await?;
        debug!(intent = %intent.id, order_id = %request.order_id, "stripe payment intent created");

        let client_secret = intent
            .client_secret
            .ok_or_else(|| PaymentProviderError::malformed(PROVIDER, "payment intent without client_secret"))?;

        Ok(PaymentSession {
            provider: PROVIDER,
            provider_ref: intent.id,
            client_secret: Some(client_secret),
            authorization_url: None,
            message: None,
        })
    }

    async fn verify(&self, provider_ref: &str) -> Result<PaymentVerification, PaymentProviderError> {
        let intent: Intent = self
            .send(self.http.get(self.url(&format!("payment_intents/{provider_ref}"))))
            .await?;

        Ok(PaymentVerification {
            status: status_from_intent(&intent.status),
            order_id: intent.metadata.order_id.and_then(|id| id.parse().ok()),
            amount: intent.amount.map(Money::from_minor),
            provider_ref: intent.id,
        })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResult, PaymentProviderError> {
        let mut form = vec![("payment_intent", request.provider_ref.clone())];
        if let Some(amount) = request.amount {
            form.push(("amount", amount.minor().to_string()));
        }
        if let Some(reason) = &request.reason {
            // `reason` is a closed enum on Stripe's side; free text goes to metadata.
            form.push(("reason", "requested_by_customer".to_string()));
            form.push(("metadata[reason]", reason.clone()));
        }

        let refund: StripeRefund = self.send(self.http.post(self.url("refunds")).form(&form)).await?;

        Ok(RefundResult {
            refund_id: refund.id,
            amount: Money::from_minor(refund.amount),
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_statuses_collapse_to_three_states() {
        assert_eq!(status_from_intent("succeeded"), PaymentStatus::Paid);
        assert_eq!(status_from_intent("canceled"), PaymentStatus::Failed);
        assert_eq!(status_from_intent("requires_payment_method"), PaymentStatus::Pending);
        assert_eq!(status_from_intent("processing"), PaymentStatus::Pending);
    }
}
