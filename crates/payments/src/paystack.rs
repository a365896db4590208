//! Paystack transactions adapter (JSON REST API).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use storefront_core::Money;
use storefront_orders::{PaymentProvider, PaymentStatus};

use crate::error::PaymentProviderError;
use crate::gateway::{
    PaymentGateway, PaymentRequest, PaymentSession, PaymentVerification, RefundRequest,
    RefundResult, ensure_success, http_client,
};

const PROVIDER: PaymentProvider = PaymentProvider::Paystack;

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub api_base: String,
    pub currency: String,
    pub timeout: Duration,
    /// Paystack requires an email; used when the customer's is unknown.
    pub fallback_email: String,
    /// Callback base when the request does not name one.
    pub frontend_url: String,
}

/// Map a transaction status onto the three-way payment vocabulary.
pub fn status_from_transaction(status: &str) -> PaymentStatus {
    match status {
        "success" => PaymentStatus::Paid,
        "failed" | "abandoned" | "reversed" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

#[derive(Debug, Clone)]
pub struct PaystackGateway {
    config: PaystackConfig,
    http: reqwest::Client,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> Result<Self, PaymentProviderError> {
        let http = http_client(PROVIDER, config.timeout)?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Every Paystack response is wrapped as `{status, message, data}`.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PaymentProviderError> {
        let response = request
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| PaymentProviderError::from_reqwest(PROVIDER, e))?;

        let envelope: Envelope<T> = ensure_success(PROVIDER, response)
            .await?
            .json()
            .await
            .map_err(|e| PaymentProviderError::malformed(PROVIDER, e.to_string()))?;

        match (envelope.status, envelope.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(PaymentProviderError::malformed(PROVIDER, "response without data")),
            (false, _) => Err(PaymentProviderError::Rejected {
                provider: PROVIDER,
                status: 200,
                message: envelope.message,
            }),
        }
    }

    fn callback_for(&self, request: &PaymentRequest) -> String {
        let base = request
            .callback_url
            .as_deref()
            .unwrap_or(&self.config.frontend_url)
            .trim_end_matches('/');
        format!("{base}/payment/paystack/callback?orderId={}", request.order_id)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Initialized {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    status: String,
    reference: String,
    #[serde(default)]
    amount: Option<u64>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PaystackRefund {
    id: serde_json::Value,
    amount: u64,
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn provider(&self) -> PaymentProvider {
        PROVIDER
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentSession, PaymentProviderError> {
        let email = request
            .customer_email
            .clone()
            .unwrap_or_else(|| self.config.fallback_email.clone());
        let body = json!({
            "amount": request.amount.minor(),
            "currency": self.config.currency.to_uppercase(),
            "email": email,
            "reference": format!("{}-{}", request.order_number, Utc::now().timestamp_millis()),
            "callback_url": self.callback_for(request),
            "metadata": {
                "orderId": request.order_id.to_string(),
                "orderNumber": request.order_number,
                "userId": request.customer.to_string(),
            },
            "channels": ["card", "bank_transfer", "ussd", "qr"],
        });

        let init: Initialized = self
            .send(self.http.post(self.url("transaction/initialize")).json(&body))
            .await?;
        debug!(reference = %init.reference, order_id = %request.order_id, "paystack transaction initialised");

        Ok(PaymentSession {
            provider: PROVIDER,
            provider_ref: init.reference,
            client_secret: None,
            authorization_url: Some(init.authorization_url),
            message: None,
        })
    }

    async fn verify(&self, provider_ref: &str) -> Result<PaymentVerification, PaymentProviderError> {
        let tx: Transaction = self
            .send(self.http.get(self.url(&format!("transaction/verify/{provider_ref}"))))
            .await?;

        let order_id = tx
            .metadata
            .as_ref()
            .and_then(|m| m.get("orderId"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok());

        Ok(PaymentVerification {
            status: status_from_transaction(&tx.status),
            order_id,
            amount: tx.amount.map(Money::from_minor),
            provider_ref: tx.reference,
        })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResult, PaymentProviderError> {
        let mut body = json!({
            "transaction": request.provider_ref,
            "merchant_note": request.reason.as_deref().unwrap_or("Refund requested"),
        });
        if let Some(amount) = request.amount {
            body["amount"] = json!(amount.minor());
        }

        let refund: PaystackRefund = self.send(self.http.post(self.url("refund")).json(&body)).await?;

        let refund_id = match refund.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };

        Ok(RefundResult {
            refund_id,
            amount: Money::from_minor(refund.amount),
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }
}
