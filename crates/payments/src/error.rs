use thiserror::Error;

use storefront_orders::PaymentProvider;

/// Failure talking to (or trusting) a payment provider.
///
/// None of these change order state; the order stays where it was so the
/// operation can be retried.
#[derive(Debug, Error)]
pub enum PaymentProviderError {
    #[error("{0} payments are not configured")]
    NotConfigured(PaymentProvider),

    #[error("{provider} request timed out")]
    Timeout { provider: PaymentProvider },

    #[error("{provider} transport error: {message}")]
    Transport {
        provider: PaymentProvider,
        message: String,
    },

    /// The provider answered but refused the request.
    #[error("{provider} rejected the request ({status}): {message}")]
    Rejected {
        provider: PaymentProvider,
        status: u16,
        message: String,
    },

    #[error("{provider} returned an unexpected response: {message}")]
    MalformedResponse {
        provider: PaymentProvider,
        message: String,
    },

    #[error("webhook signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: PaymentProvider,
        operation: &'static str,
    },
}

impl PaymentProviderError {
    pub(crate) fn from_reqwest(provider: PaymentProvider, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { provider }
        } else if err.is_decode() {
            Self::MalformedResponse {
                provider,
                message: err.to_string(),
            }
        } else {
            Self::Transport {
                provider,
                message: err.to_string(),
            }
        }
    }

    pub(crate) fn malformed(provider: PaymentProvider, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            provider,
            message: message.into(),
        }
    }

    /// HTTP status at the API boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotConfigured(_) | Self::Unsupported { .. } | Self::InvalidSignature(_) => 400,
            Self::Rejected { .. } => 402,
            Self::Timeout { .. } => 504,
            Self::Transport { .. } | Self::MalformedResponse { .. } => 502,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature(_) => "invalid_signature",
            _ => "payment_provider_error",
        }
    }
}
