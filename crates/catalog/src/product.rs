use serde::{Deserialize, Serialize};

use storefront_core::{Money, typed_id};

typed_id!(
    /// Product identifier.
    ProductId
);

/// Product publication lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Published,
    Archived,
}

/// Product-level discount, applied before any coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProductDiscount {
    /// Flat amount off the list price (floored at zero).
    Fixed { amount: Money },
    /// Percentage (0–100) off the list price.
    Percentage { percent: u8 },
}

/// Catalog record for a sellable SKU.
///
/// The checkout core only reads it, decrements `stock`/increments `sold` when an
/// order is placed, and does the reverse when an order is cancelled or refunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    /// List price in minor units.
    pub price: Money,
    pub discount: Option<ProductDiscount>,
    pub stock: u32,
    pub sold: u32,
    pub status: ProductStatus,
    pub active: bool,
}

impl Product {
    /// A published, active product with no discount and nothing sold yet.
    pub fn published(id: ProductId, name: impl Into<String>, sku: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id,
            name: name.into(),
            sku: sku.into().to_uppercase(),
            price,
            discount: None,
            stock,
            sold: 0,
            status: ProductStatus::Published,
            active: true,
        }
    }

    pub fn with_discount(mut self, discount: ProductDiscount) -> Self {
        self.discount = Some(discount);
        self
    }

    /// Price after the product-level discount.
    pub fn final_price(&self) -> Money {
        match self.discount {
            None => self.price,
            Some(ProductDiscount::Fixed { amount }) => self.price.saturating_sub(amount),
            Some(ProductDiscount::Percentage { percent }) => {
                self.price.saturating_sub(self.price.percent(percent.min(100)))
            }
        }
    }

    /// Only active, published products can be added to a cart or ordered.
    pub fn is_purchasable(&self) -> bool {
        self.active && self.status == ProductStatus::Published
    }

    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }
}
