use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument};

use storefront_cart::{Cart, CartSummary, CartValidation};
use storefront_catalog::{Coupon, Product, ProductId};
use storefront_core::{DomainError, Money, UserId};

use super::{ServiceResult, SharedStore};

/// Current catalog state for every line of `cart`, plus its coupon if still active.
pub(crate) async fn catalog_for(
    store: &SharedStore,
    cart: &Cart,
) -> ServiceResult<(HashMap<ProductId, Product>, Option<Coupon>)> {
    let ids: Vec<ProductId> = cart.items().iter().map(|i| i.product_id).collect();
    let products = store
        .products(&ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let coupon = match cart.coupon() {
        Some(applied) => store.coupon(applied.coupon_id).await?.filter(|c| c.active),
        None => None,
    };
    Ok((products, coupon))
}

#[derive(Clone)]
pub struct CartService {
    store: SharedStore,
    ttl: Duration,
}

impl CartService {
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The owner's cart; a fresh empty one when none exists or it expired.
    async fn load(&self, owner: UserId, now: DateTime<Utc>) -> ServiceResult<Cart> {
        match self.store.cart(owner).await? {
            Some(cart) if !cart.is_expired(now) => Ok(cart),
            Some(_) => {
                debug!(%owner, "abandoned cart expired");
                self.store.delete_cart(owner).await?;
                Ok(Cart::new(owner, now, self.ttl))
            }
            None => Ok(Cart::new(owner, now, self.ttl)),
        }
    }

    async fn save(&self, mut cart: Cart, now: DateTime<Utc>) -> ServiceResult<Cart> {
        cart.touch(now, self.ttl);
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    async fn product(&self, id: ProductId) -> ServiceResult<Product> {
        Ok(self
            .store
            .product(id)
            .await?
            .ok_or_else(|| DomainError::not_found("product"))?)
    }

    pub async fn get(&self, owner: UserId) -> ServiceResult<Cart> {
        self.load(owner, Utc::now()).await
    }

    pub async fn summary(&self, owner: UserId) -> ServiceResult<CartSummary> {
        Ok(self.get(owner).await?.summary())
    }

    #[instrument(skip(self), fields(user_id = %owner, product_id = %product_id))]
    pub async fn add_item(&self, owner: UserId, product_id: ProductId, quantity: u32) -> ServiceResult<Cart> {
        let now = Utc::now();
        let product = self.product(product_id).await?;
        let mut cart = self.load(owner, now).await?;
        cart.add_item(&product, quantity)?;
        self.save(cart, now).await
    }

    /// Set a line's quantity; zero removes it.
    #[instrument(skip(self), fields(user_id = %owner, product_id = %product_id))]
    pub async fn update_item(&self, owner: UserId, product_id: ProductId, quantity: u32) -> ServiceResult<Cart> {
        let now = Utc::now();
        let mut cart = self.load(owner, now).await?;
        if quantity == 0 {
            cart.remove_item(product_id);
        } else {
            let product = self.product(product_id).await?;
            cart.update_item(&product, quantity)?;
        }
        self.save(cart, now).await
    }

    #[instrument(skip(self), fields(user_id = %owner, product_id = %product_id))]
    pub async fn remove_item(&self, owner: UserId, product_id: ProductId) -> ServiceResult<Cart> {
        let now = Utc::now();
        let mut cart = self.load(owner, now).await?;
        if !cart.remove_item(product_id) {
            return Err(DomainError::not_found("cart item").into());
        }
        self.save(cart, now).await
    }

    /// Empty the cart and drop its coupon.
    pub async fn clear(&self, owner: UserId) -> ServiceResult<Cart> {
        let now = Utc::now();
        let mut cart = self.load(owner, now).await?;
        cart.clear();
        self.save(cart, now).await
    }

    /// Apply a coupon by code; returns the cart and the discount it grants now.
    #[instrument(skip(self), fields(user_id = %owner))]
    pub async fn apply_coupon(&self, owner: UserId, code: &str) -> ServiceResult<(Cart, Money)> {
        let now = Utc::now();
        let coupon = self
            .store
            .coupon_by_code(code)
            .await?
            .ok_or_else(|| DomainError::not_found("coupon"))?;
        let mut cart = self.load(owner, now).await?;
        let discount = cart.apply_coupon(&coupon, now)?;
        Ok((self.save(cart, now).await?, discount))
    }

    pub async fn remove_coupon(&self, owner: UserId) -> ServiceResult<Cart> {
        let now = Utc::now();
        let mut cart = self.load(owner, now).await?;
        if !cart.remove_coupon() {
            return Err(DomainError::not_found("applied coupon").into());
        }
        self.save(cart, now).await
    }

    /// Re-check every line against the catalog, persisting any corrections.
    #[instrument(skip(self), fields(user_id = %owner))]
    pub async fn validate(&self, owner: UserId) -> ServiceResult<(Cart, CartValidation)> {
        let now = Utc::now();
        let mut cart = self.load(owner, now).await?;
        let (products, coupon) = catalog_for(&self.store, &cart).await?;
        let validation = cart.validate(&products, coupon.as_ref(), now);
        if !validation.valid {
            debug!(issues = validation.issues.len(), "cart corrected");
            cart = self.save(cart, now).await?;
        }
        Ok((cart, validation))
    }

    /// Refresh every price snapshot; returns how many lines changed.
    pub async fn sync_prices(&self, owner: UserId) -> ServiceResult<(Cart, usize)> {
        let now = Utc::now();
        let mut cart = self.load(owner, now).await?;
        let (products, _) = catalog_for(&self.store, &cart).await?;
        let changed = cart.sync_prices(&products);
        Ok((self.save(cart, now).await?, changed))
    }
}
