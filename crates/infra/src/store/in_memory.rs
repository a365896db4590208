//! In-memory commerce store.
//!
//! A single async mutex over the whole state gives the single-writer model: a
//! transaction holds the lock, works on a copy, and swaps it in on commit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use storefront_cart::Cart;
use storefront_catalog::{Address, AddressId, Coupon, CouponId, Product, ProductId};
use storefront_core::{AggregateRoot, ExpectedVersion, UserId};
use storefront_orders::{Order, OrderId, OrderNumber, PaymentProvider};

use super::{
    AddressStore, CartStore, CouponStore, OrderStore, ProductStore, StoreError, StoreResult,
    StoreTransaction, UnitOfWork,
};

#[derive(Debug, Clone, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    coupons: HashMap<CouponId, Coupon>,
    addresses: HashMap<AddressId, Address>,
    carts: HashMap<UserId, Cart>,
    orders: HashMap<OrderId, Order>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCommerceStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryCommerceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a catalog product.
    pub async fn put_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn put_coupon(&self, coupon: Coupon) {
        self.state.lock().await.coupons.insert(coupon.id, coupon);
    }

    pub async fn put_address(&self, address: Address) {
        self.state.lock().await.addresses.insert(address.id, address);
    }
}

#[async_trait]
impl ProductStore for InMemoryCommerceStore {
    async fn product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn products(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.products.get(id).cloned()).collect())
    }
}

#[async_trait]
impl CouponStore for InMemoryCommerceStore {
    async fn coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        let code = Coupon::normalize_code(code);
        let state = self.state.lock().await;
        Ok(state
            .coupons
            .values()
            .find(|c| c.active && c.code == code)
            .cloned())
    }

    async fn coupon(&self, id: CouponId) -> StoreResult<Option<Coupon>> {
        Ok(self.state.lock().await.coupons.get(&id).cloned())
    }
}

#[async_trait]
impl AddressStore for InMemoryCommerceStore {
    async fn address(&self, id: AddressId) -> StoreResult<Option<Address>> {
        Ok(self.state.lock().await.addresses.get(&id).cloned())
    }
}

#[async_trait]
impl CartStore for InMemoryCommerceStore {
    async fn cart(&self, owner: UserId) -> StoreResult<Option<Cart>> {
        Ok(self.state.lock().await.carts.get(&owner).cloned())
    }

    async fn save_cart(&self, cart: &Cart) -> StoreResult<()> {
        self.state.lock().await.carts.insert(cart.owner(), cart.clone());
        Ok(())
    }

    async fn delete_cart(&self, owner: UserId) -> StoreResult<()> {
        self.state.lock().await.carts.remove(&owner);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryCommerceStore {
    async fn order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn order_by_payment_ref(
        &self,
        provider: PaymentProvider,
        payment_ref: &str,
    ) -> StoreResult<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.payment_provider() == provider && o.payment_ref() == Some(payment_ref))
            .cloned())
    }

    async fn orders_for(&self, owner: UserId) -> StoreResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.is_owned_by(owner))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryCommerceStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn product_for_update(&mut self, id: ProductId) -> StoreResult<Option<Product>> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn decrement_stock(&mut self, id: ProductId, quantity: u32) -> StoreResult<()> {
        let product = self
            .working
            .products
            .get_mut(&id)
            .ok_or(StoreError::NotFound("product"))?;
        if product.stock < quantity {
            return Err(StoreError::InsufficientStock {
                product_id: id,
                requested: quantity,
                available: product.stock,
            });
        }
        product.stock -= quantity;
        product.sold = product.sold.saturating_add(quantity);
        Ok(())
    }

    async fn increment_stock(&mut self, id: ProductId, quantity: u32) -> StoreResult<()> {
        let product = self
            .working
            .products
            .get_mut(&id)
            .ok_or(StoreError::NotFound("product"))?;
        product.stock = product.stock.saturating_add(quantity);
        product.sold = product.sold.saturating_sub(quantity);
        Ok(())
    }

    async fn increment_coupon_usage(&mut self, id: CouponId) -> StoreResult<()> {
        let coupon = self
            .working
            .coupons
            .get_mut(&id)
            .ok_or(StoreError::NotFound("coupon"))?;
        if coupon.is_exhausted() {
            return Err(StoreError::CouponExhausted(id));
        }
        coupon.used_count += 1;
        Ok(())
    }

    async fn order_number_taken(&mut self, number: &OrderNumber) -> StoreResult<bool> {
        Ok(self.working.orders.values().any(|o| o.number() == number))
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        if self.working.orders.contains_key(&order.id_typed()) {
            return Err(StoreError::Duplicate(format!("order {}", order.id_typed())));
        }
        if self.working.orders.values().any(|o| o.number() == order.number()) {
            return Err(StoreError::Duplicate(format!("order number {}", order.number())));
        }
        self.working.orders.insert(order.id_typed(), order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order, expected: ExpectedVersion) -> StoreResult<()> {
        let stored = self
            .working
            .orders
            .get_mut(&order.id_typed())
            .ok_or(StoreError::NotFound("order"))?;
        if !expected.matches(stored.version()) {
            return Err(StoreError::Concurrency(format!(
                "order {} is at version {}, expected {expected:?}",
                order.id_typed(),
                stored.version()
            )));
        }
        *stored = order.clone();
        Ok(())
    }

    async fn delete_cart(&mut self, owner: UserId) -> StoreResult<()> {
        self.working.carts.remove(&owner);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
