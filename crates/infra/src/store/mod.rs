//! Persistence boundary for the checkout core.
//!
//! Reads and last-writer-wins cart writes go straight through the collaborator
//! traits. The two atomic units (order creation, and status changes that move
//! stock) run inside a [`StoreTransaction`] obtained from [`UnitOfWork::begin`].

use async_trait::async_trait;
use thiserror::Error;

use storefront_cart::Cart;
use storefront_catalog::{Address, AddressId, Coupon, CouponId, Product, ProductId};
use storefront_core::{ExpectedVersion, UserId};
use storefront_orders::{Order, OrderId, OrderNumber, PaymentProvider};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCommerceStore;
pub use postgres::PostgresCommerceStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Conditional stock decrement found fewer units than requested.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("coupon {0} has reached its usage limit")]
    CouponExhausted(CouponId),

    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        match &value {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            _ => StoreError::Backend(value.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Product catalog collaborator.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn product(&self, id: ProductId) -> StoreResult<Option<Product>>;

    /// Products by id; missing ids are simply absent from the result.
    async fn products(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>>;
}

/// Coupon collaborator.
#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Active coupon by code (case-insensitive).
    async fn coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>>;

    async fn coupon(&self, id: CouponId) -> StoreResult<Option<Coupon>>;
}

/// Address book collaborator.
#[async_trait]
pub trait AddressStore: Send + Sync {
    async fn address(&self, id: AddressId) -> StoreResult<Option<Address>>;
}

/// Carts are single-owner; writes are last-writer-wins.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn cart(&self, owner: UserId) -> StoreResult<Option<Cart>>;

    async fn save_cart(&self, cart: &Cart) -> StoreResult<()>;

    async fn delete_cart(&self, owner: UserId) -> StoreResult<()>;
}

/// Order reads. Every order write goes through a [`StoreTransaction`].
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn order(&self, id: OrderId) -> StoreResult<Option<Order>>;

    async fn order_by_payment_ref(
        &self,
        provider: PaymentProvider,
        payment_ref: &str,
    ) -> StoreResult<Option<Order>>;

    /// Orders placed by `owner`, newest first.
    async fn orders_for(&self, owner: UserId) -> StoreResult<Vec<Order>>;
}

/// One atomic unit of work. Dropping it without [`commit`](Self::commit) rolls
/// every change back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Read a product and hold it against concurrent writers until commit.
    async fn product_for_update(&mut self, id: ProductId) -> StoreResult<Option<Product>>;

    /// Take `quantity` units off the shelf (`stock -= q`, `sold += q`), only if
    /// at least `quantity` are in stock.
    async fn decrement_stock(&mut self, id: ProductId, quantity: u32) -> StoreResult<()>;

    /// Put units back (`stock += q`, `sold -= q`, floored at zero).
    async fn increment_stock(&mut self, id: ProductId, quantity: u32) -> StoreResult<()>;

    /// Count one redemption, only while the usage limit allows it.
    async fn increment_coupon_usage(&mut self, id: CouponId) -> StoreResult<()>;

    async fn order_number_taken(&mut self, number: &OrderNumber) -> StoreResult<bool>;

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;

    /// Replace a stored order, provided it is still at `expected`.
    async fn update_order(&mut self, order: &Order, expected: ExpectedVersion) -> StoreResult<()>;

    async fn delete_cart(&mut self, owner: UserId) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// Everything the orchestrator needs from storage.
pub trait CommerceStore:
    ProductStore + CouponStore + AddressStore + CartStore + OrderStore + UnitOfWork
{
}

impl<T> CommerceStore for T where
    T: ProductStore + CouponStore + AddressStore + CartStore + OrderStore + UnitOfWork
{
}
