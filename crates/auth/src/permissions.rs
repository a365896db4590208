use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (e.g. `"orders.manage"`).
///
/// `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// Read any customer's orders.
    pub const ORDERS_READ_ANY: Permission = Permission(Cow::Borrowed("orders.read_any"));
    /// Move fulfillment status along.
    pub const ORDERS_MANAGE: Permission = Permission(Cow::Borrowed("orders.manage"));
    /// Issue refunds.
    pub const PAYMENTS_REFUND: Permission = Permission(Cow::Borrowed("payments.refund"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
