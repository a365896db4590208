//! Cash on delivery: no provider, no network.

use async_trait::async_trait;

use storefront_orders::{PaymentProvider, PaymentStatus};

use crate::error::PaymentProviderError;
use crate::gateway::{
    PaymentGateway, PaymentRequest, PaymentSession, PaymentVerification, RefundRequest,
    RefundResult,
};

/// COD orders stay `pending` until staff record the collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodGateway;

#[async_trait]
impl PaymentGateway for CodGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Cod
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentSession, PaymentProviderError> {
        Ok(PaymentSession {
            provider: PaymentProvider::Cod,
            provider_ref: request.order_number.clone(),
            client_secret: None,
            authorization_url: None,
            message: Some("Awaiting payment on delivery".to_string()),
        })
    }

    async fn verify(&self, provider_ref: &str) -> Result<PaymentVerification, PaymentProviderError> {
        Ok(PaymentVerification {
            provider_ref: provider_ref.to_string(),
            status: PaymentStatus::Pending,
            order_id: None,
            amount: None,
        })
    }

    async fn refund(&self, _request: &RefundRequest) -> Result<RefundResult, PaymentProviderError> {
        Err(PaymentProviderError::Unsupported {
            provider: PaymentProvider::Cod,
            operation: "refunds",
        })
    }
}
