use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use storefront_catalog::{Coupon, CouponId, CouponRule, Product, ProductId};
use storefront_core::{AggregateRoot, DomainError, DomainResult, Money, UserId};

/// One product selection with the prices captured when it was last added,
/// updated or validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: Money,
    pub final_price: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money {
        self.final_price.times(self.quantity)
    }

    fn savings(&self) -> Money {
        self.price.saturating_sub(self.final_price).times(self.quantity)
    }

    fn is_stale(&self, product: &Product) -> bool {
        self.price != product.price || self.final_price != product.final_price()
    }

    fn refresh(&mut self, product: &Product) {
        self.price = product.price;
        self.final_price = product.final_price();
    }
}

/// Coupon attached to a cart. The rule is kept so the discount can be
/// recomputed whenever the subtotal moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub coupon_id: CouponId,
    pub code: String,
    pub rule: CouponRule,
}

/// Outcome of [`Cart::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartValidation {
    pub valid: bool,
    pub issues: Vec<String>,
}

/// Read-only digest of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    pub item_count: u32,
    pub line_count: usize,
    pub subtotal: Money,
    pub discount: Money,
    pub coupon_code: Option<String>,
    pub coupon_discount: Money,
    pub total: Money,
}

/// Aggregate root: the per-user cart.
///
/// After every mutation:
/// - `subtotal == Σ final_price × quantity`
/// - `discount == Σ (price − final_price) × quantity`
/// - `total == max(0, subtotal − coupon_discount)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    owner: UserId,
    items: Vec<CartItem>,
    coupon: Option<AppliedCoupon>,
    coupon_discount: Money,
    subtotal: Money,
    discount: Money,
    total: Money,
    version: u64,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AggregateRoot for Cart {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.owner
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Cart {
    /// Empty cart for `owner`, expiring `ttl` after `now` unless touched.
    pub fn new(owner: UserId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            owner,
            items: Vec::new(),
            coupon: None,
            coupon_discount: Money::ZERO,
            subtotal: Money::ZERO,
            discount: Money::ZERO,
            total: Money::ZERO,
            version: 0,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn item(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn coupon(&self) -> Option<&AppliedCoupon> {
        self.coupon.as_ref()
    }

    pub fn coupon_discount(&self) -> Money {
        self.coupon_discount
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn discount(&self) -> Money {
        self.discount
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Record activity: pushes expiry out to `now + ttl`.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.updated_at = now;
        self.expires_at = now + ttl;
    }

    /// Add `quantity` units of `product`, merging with an existing line.
    pub fn add_item(&mut self, product: &Product, quantity: u32) -> DomainResult<()> {
        if quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }
        ensure_purchasable(product)?;

        let existing = self.item(product.id).map_or(0, |i| i.quantity);
        let wanted = existing.saturating_add(quantity);
        ensure_stock(product, wanted)?;

        match self.items.iter_mut().find(|i| i.product_id == product.id) {
            Some(item) => {
                item.quantity = wanted;
                item.refresh(product);
            }
            None => self.items.push(CartItem {
                product_id: product.id,
                quantity,
                price: product.price,
                final_price: product.final_price(),
            }),
        }

        self.recalculate();
        Ok(())
    }

    /// Set the quantity of an existing line. Zero removes the line.
    pub fn update_item(&mut self, product: &Product, quantity: u32) -> DomainResult<()> {
        if self.item(product.id).is_none() {
            return Err(DomainError::not_found("cart item"));
        }
        if quantity == 0 {
            self.remove_item(product.id);
            return Ok(());
        }
        ensure_purchasable(product)?;
        ensure_stock(product, quantity)?;

        if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product.id) {
            item.quantity = quantity;
            item.refresh(product);
        }

        self.recalculate();
        Ok(())
    }

    /// Returns whether a line was removed.
    pub fn remove_item(&mut self, product_id: ProductId) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        let removed = self.items.len() != before;
        if removed {
            self.recalculate();
        }
        removed
    }

    /// Drop every line and any applied coupon.
    pub fn clear(&mut self) {
        self.items.clear();
        self.coupon = None;
        self.recalculate();
    }

    /// Attach `coupon` after checking its window, usage cap and minimum.
    ///
    /// Replaces any coupon already applied.
    pub fn apply_coupon(&mut self, coupon: &Coupon, now: DateTime<Utc>) -> DomainResult<Money> {
        coupon.ensure_redeemable(now)?;
        coupon.ensure_minimum(self.subtotal)?;

        self.coupon = Some(AppliedCoupon {
            coupon_id: coupon.id,
            code: coupon.code.clone(),
            rule: coupon.rule,
        });
        self.recalculate();
        Ok(self.coupon_discount)
    }

    /// Returns whether a coupon was attached.
    pub fn remove_coupon(&mut self) -> bool {
        let had = self.coupon.take().is_some();
        if had {
            self.recalculate();
        }
        had
    }

    /// Refresh every price snapshot from the catalog without any other
    /// correction. Lines whose product is missing are left alone.
    ///
    /// Returns the number of lines whose prices changed.
    pub fn sync_prices(&mut self, products: &HashMap<ProductId, Product>) -> usize {
        let mut changed = 0;
        for item in &mut self.items {
            if let Some(product) = products.get(&item.product_id) {
                if item.is_stale(product) {
                    item.refresh(product);
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.recalculate();
        }
        changed
    }

    /// Re-check every line against the live catalog and the applied coupon
    /// against its live record, correcting the cart in place.
    ///
    /// `coupon` is the current record of the applied coupon (`None` if it no
    /// longer exists or is inactive). Every correction is reported; the cart is
    /// valid only when nothing had to change.
    pub fn validate(
        &mut self,
        products: &HashMap<ProductId, Product>,
        coupon: Option<&Coupon>,
        now: DateTime<Utc>,
    ) -> CartValidation {
        let mut issues = Vec::new();

        self.items.retain_mut(|item| {
            let Some(product) = products.get(&item.product_id) else {
                issues.push("Product removed: Item no longer exists".to_string());
                return false;
            };
            if !product.is_purchasable() {
                issues.push(format!("{}: Product is no longer available", product.name));
                return false;
            }
            if product.stock == 0 {
                issues.push(format!("{}: Out of stock", product.name));
                return false;
            }
            if item.quantity > product.stock {
                issues.push(format!(
                    "{}: Quantity reduced from {} to {} (limited stock)",
                    product.name, item.quantity, product.stock
                ));
                item.quantity = product.stock;
            }
            if item.is_stale(product) {
                issues.push(format!("{}: Price updated", product.name));
                item.refresh(product);
            }
            true
        });

        self.recalculate();

        if let Some(applied) = self.coupon.clone() {
            let verdict = match coupon.filter(|c| c.id == applied.coupon_id && c.active) {
                None => Err(format!("Coupon {}: no longer available", applied.code)),
                Some(live) => live
                    .ensure_redeemable(now)
                    .and_then(|_| live.ensure_minimum(self.subtotal))
                    .map(|_| live.rule)
                    .map_err(|e| format!("Coupon {}: {e}", applied.code)),
            };

            match verdict {
                Ok(rule) if rule != applied.rule => {
                    issues.push(format!("Coupon {}: discount updated", applied.code));
                    if let Some(c) = self.coupon.as_mut() {
                        c.rule = rule;
                    }
                    self.recalculate();
                }
                Ok(_) => {}
                Err(issue) => {
                    issues.push(issue);
                    self.coupon = None;
                    self.recalculate();
                }
            }
        }

        CartValidation {
            valid: issues.is_empty(),
            issues,
        }
    }

    pub fn summary(&self) -> CartSummary {
        CartSummary {
            item_count: self.items.iter().map(|i| i.quantity).sum(),
            line_count: self.items.len(),
            subtotal: self.subtotal,
            discount: self.discount,
            coupon_code: self.coupon.as_ref().map(|c| c.code.clone()),
            coupon_discount: self.coupon_discount,
            total: self.total,
        }
    }

    fn recalculate(&mut self) {
        self.subtotal = self.items.iter().map(CartItem::line_total).sum();
        self.discount = self.items.iter().map(CartItem::savings).sum();
        self.coupon_discount = self
            .coupon
            .as_ref()
            .map_or(Money::ZERO, |c| c.rule.discount_for(self.subtotal));
        self.total = self.subtotal.saturating_sub(self.coupon_discount);
        self.version += 1;
    }
}

fn ensure_purchasable(product: &Product) -> DomainResult<()> {
    if product.is_purchasable() {
        Ok(())
    } else {
        Err(DomainError::Unavailable(product.name.clone()))
    }
}

fn ensure_stock(product: &Product, quantity: u32) -> DomainResult<()> {
    if product.has_stock_for(quantity) {
        Ok(())
    } else {
        Err(DomainError::InsufficientStock {
            product: product.name.clone(),
            requested: quantity,
            available: product.stock,
        })
    }
}
