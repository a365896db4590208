//! Order state machines and the payment provider vocabulary.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use storefront_core::DomainError;

/// Fulfillment lifecycle.
///
/// `pending → confirmed → processing → shipped → delivered`, with
/// `pending|confirmed → cancelled` and any non-terminal state → `refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl FulfillmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => "pending",
            FulfillmentStatus::Confirmed => "confirmed",
            FulfillmentStatus::Processing => "processing",
            FulfillmentStatus::Shipped => "shipped",
            FulfillmentStatus::Delivered => "delivered",
            FulfillmentStatus::Cancelled => "cancelled",
            FulfillmentStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FulfillmentStatus::Delivered | FulfillmentStatus::Cancelled | FulfillmentStatus::Refunded
        )
    }

    /// Next step on the happy path.
    pub fn next(self) -> Option<FulfillmentStatus> {
        match self {
            FulfillmentStatus::Pending => Some(FulfillmentStatus::Confirmed),
            FulfillmentStatus::Confirmed => Some(FulfillmentStatus::Processing),
            FulfillmentStatus::Processing => Some(FulfillmentStatus::Shipped),
            FulfillmentStatus::Shipped => Some(FulfillmentStatus::Delivered),
            _ => None,
        }
    }

    pub fn can_cancel(self) -> bool {
        matches!(self, FulfillmentStatus::Pending | FulfillmentStatus::Confirmed)
    }

    /// Whether reaching this status puts the order's units back on the shelf.
    pub fn restores_stock(self) -> bool {
        matches!(self, FulfillmentStatus::Cancelled | FulfillmentStatus::Refunded)
    }
}

/// Payment lifecycle.
///
/// `pending → paid → refunded|partially_refunded`, `pending → failed`, and
/// `failed → paid` when a retried charge succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    /// Money has been captured at some point.
    pub fn is_captured(self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
        )
    }
}

/// Payment providers an order can be settled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Paystack,
    Cod,
}

impl PaymentProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Paystack => "paystack",
            PaymentProvider::Cod => "cod",
        }
    }
}

macro_rules! impl_str_enum {
    ($t:ty, $what:literal, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| DomainError::validation(format!("invalid {}: {s}", $what)))
            }
        }
    };
}

impl_str_enum!(
    FulfillmentStatus,
    "status",
    [
        FulfillmentStatus::Pending,
        FulfillmentStatus::Confirmed,
        FulfillmentStatus::Processing,
        FulfillmentStatus::Shipped,
        FulfillmentStatus::Delivered,
        FulfillmentStatus::Cancelled,
        FulfillmentStatus::Refunded,
    ]
);

impl_str_enum!(
    PaymentStatus,
    "payment status",
    [
        PaymentStatus::Pending,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
        PaymentStatus::PartiallyRefunded,
    ]
);

impl_str_enum!(
    PaymentProvider,
    "payment provider",
    [PaymentProvider::Stripe, PaymentProvider::Paystack, PaymentProvider::Cod]
);
