//! Postgres-backed commerce store.
//!
//! Catalog collaborators live in plain columns so stock and coupon usage can be
//! updated conditionally in SQL. Carts and orders are stored as JSONB documents
//! next to the columns needed for lookups and the order version check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use storefront_cart::Cart;
use storefront_catalog::{
    Address, AddressId, AddressSnapshot, Coupon, CouponId, CouponRule, Product, ProductDiscount,
    ProductId, ProductStatus,
};
use storefront_core::{AggregateId, AggregateRoot, ExpectedVersion, Money, UserId};
use storefront_orders::{Order, OrderId, OrderNumber, PaymentProvider};

use super::{
    AddressStore, CartStore, CouponStore, OrderStore, ProductStore, StoreError, StoreResult,
    StoreTransaction, UnitOfWork,
};

const SCHEMA: &str = include_str!("../../migrations/0001_storefront.sql");

const PRODUCT_COLUMNS: &str = "id, name, sku, price, discount, stock, sold, status, active";
const COUPON_COLUMNS: &str =
    "id, code, rule, minimum_order, usage_limit, used_count, starts_at, ends_at, active";

#[derive(Debug, Clone)]
pub struct PostgresCommerceStore {
    pool: PgPool,
}

impl PostgresCommerceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the schema if it does not exist yet.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn money(value: i64) -> StoreResult<Money> {
    u64::try_from(value)
        .map(Money::from_minor)
        .map_err(|_| StoreError::Backend(format!("negative amount {value}")))
}

fn count(value: i32) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Backend(format!("negative count {value}")))
}

fn int(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::Backend(format!("count {value} out of range")))
}

fn minor(value: Money) -> StoreResult<i64> {
    i64::try_from(value.minor())
        .map_err(|_| StoreError::Backend(format!("amount {value} out of range")))
}

fn from_text<T: DeserializeOwned>(value: String) -> StoreResult<T> {
    Ok(serde_json::from_value(serde_json::Value::String(value))?)
}

fn product_from_row(row: &PgRow) -> StoreResult<Product> {
    let discount: Option<Json<ProductDiscount>> = row.try_get("discount")?;
    let status: ProductStatus = from_text(row.try_get("status")?)?;
    Ok(Product {
        id: ProductId(AggregateId::from_uuid(row.try_get("id")?)),
        name: row.try_get("name")?,
        sku: row.try_get("sku")?,
        price: money(row.try_get("price")?)?,
        discount: discount.map(|d| d.0),
        stock: count(row.try_get("stock")?)?,
        sold: count(row.try_get("sold")?)?,
        status,
        active: row.try_get("active")?,
    })
}

fn coupon_from_row(row: &PgRow) -> StoreResult<Coupon> {
    let Json(rule): Json<CouponRule> = row.try_get("rule")?;
    let minimum_order: Option<i64> = row.try_get("minimum_order")?;
    let usage_limit: Option<i32> = row.try_get("usage_limit")?;
    Ok(Coupon {
        id: CouponId(AggregateId::from_uuid(row.try_get("id")?)),
        code: row.try_get("code")?,
        rule,
        minimum_order: minimum_order.map(money).transpose()?,
        usage_limit: usage_limit.map(count).transpose()?,
        used_count: count(row.try_get("used_count")?)?,
        starts_at: row.try_get::<Option<DateTime<Utc>>, _>("starts_at")?,
        ends_at: row.try_get::<Option<DateTime<Utc>>, _>("ends_at")?,
        active: row.try_get("active")?,
    })
}

fn document<T: DeserializeOwned>(row: &PgRow) -> StoreResult<T> {
    let Json(value): Json<T> = row.try_get("document")?;
    Ok(value)
}

#[async_trait]
impl ProductStore for PostgresCommerceStore {
    async fn product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn products(&self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)"))
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(product_from_row).collect()
    }
}

#[async_trait]
impl CouponStore for PostgresCommerceStore {
    async fn coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        let row = sqlx::query(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1 AND active"
        ))
        .bind(Coupon::normalize_code(code))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(coupon_from_row).transpose()
    }

    async fn coupon(&self, id: CouponId) -> StoreResult<Option<Coupon>> {
        let row = sqlx::query(&format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(coupon_from_row).transpose()
    }
}

#[async_trait]
impl AddressStore for PostgresCommerceStore {
    async fn address(&self, id: AddressId) -> StoreResult<Option<Address>> {
        let row = sqlx::query("SELECT id, owner, lines FROM addresses WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Json(lines): Json<AddressSnapshot> = row.try_get("lines")?;
        Ok(Some(Address {
            id,
            owner: UserId::from_uuid(row.try_get("owner")?),
            lines,
        }))
    }
}

#[async_trait]
impl CartStore for PostgresCommerceStore {
    async fn cart(&self, owner: UserId) -> StoreResult<Option<Cart>> {
        let row = sqlx::query("SELECT document FROM carts WHERE owner = $1")
            .bind(*owner.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document::<Cart>).transpose()
    }

    async fn save_cart(&self, cart: &Cart) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (owner, expires_at, document)
            VALUES ($1, $2, $3)
            ON CONFLICT (owner)
            DO UPDATE SET
                expires_at = EXCLUDED.expires_at,
                document = EXCLUDED.document
            "#,
        )
        .bind(*cart.owner().as_uuid())
        .bind(cart.expires_at())
        .bind(Json(cart))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_cart(&self, owner: UserId) -> StoreResult<()> {
        sqlx::query("DELETE FROM carts WHERE owner = $1")
            .bind(*owner.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresCommerceStore {
    async fn order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        let row = sqlx::query("SELECT document FROM orders WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document::<Order>).transpose()
    }

    async fn order_by_payment_ref(
        &self,
        provider: PaymentProvider,
        payment_ref: &str,
    ) -> StoreResult<Option<Order>> {
        let row = sqlx::query(
            "SELECT document FROM orders WHERE payment_provider = $1 AND payment_ref = $2",
        )
        .bind(provider.as_str())
        .bind(payment_ref)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document::<Order>).transpose()
    }

    async fn orders_for(&self, owner: UserId) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query("SELECT document FROM orders WHERE owner = $1 ORDER BY created_at DESC")
            .bind(*owner.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document::<Order>).collect()
    }
}

#[async_trait]
impl UnitOfWork for PostgresCommerceStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn product_for_update(&mut self, id: ProductId) -> StoreResult<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn decrement_stock(&mut self, id: ProductId, quantity: u32) -> StoreResult<()> {
        let qty = int(quantity)?;
        let updated = sqlx::query(
            r#"
            UPDATE products
            SET stock = stock - $2,
                sold = sold + $2
            WHERE id = $1 AND stock >= $2
            "#,
        )
        .bind(*id.as_uuid())
        .bind(qty)
        .execute(&mut *self.tx)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let available: Option<i32> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        match available {
            None => Err(StoreError::NotFound("product")),
            Some(available) => Err(StoreError::InsufficientStock {
                product_id: id,
                requested: quantity,
                available: count(available)?,
            }),
        }
    }

    async fn increment_stock(&mut self, id: ProductId, quantity: u32) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE products
            SET stock = stock + $2,
                sold = GREATEST(sold - $2, 0)
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .bind(int(quantity)?)
        .execute(&mut *self.tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound("product"));
        }
        Ok(())
    }

    async fn increment_coupon_usage(&mut self, id: CouponId) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE coupons
            SET used_count = used_count + 1
            WHERE id = $1 AND (usage_limit IS NULL OR used_count < usage_limit)
            "#,
        )
        .bind(*id.as_uuid())
        .execute(&mut *self.tx)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM coupons WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        match exists {
            None => Err(StoreError::NotFound("coupon")),
            Some(_) => Err(StoreError::CouponExhausted(id)),
        }
    }

    async fn order_number_taken(&mut self, number: &OrderNumber) -> StoreResult<bool> {
        let taken: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE number = $1)")
            .bind(number.as_str())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(taken)
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, number, owner, payment_provider, payment_ref, version, created_at, document
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*order.id_typed().as_uuid())
        .bind(order.number().as_str())
        .bind(*order.owner().as_uuid())
        .bind(order.payment_provider().as_str())
        .bind(order.payment_ref())
        .bind(version(order.version())?)
        .bind(order.created_at().unwrap_or_else(Utc::now))
        .bind(Json(order))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_order(&mut self, order: &Order, expected: ExpectedVersion) -> StoreResult<()> {
        let expected_version = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version(v)?),
        };

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET payment_provider = $2,
                payment_ref = $3,
                version = $4,
                document = $5
            WHERE id = $1 AND ($6::BIGINT IS NULL OR version = $6)
            "#,
        )
        .bind(*order.id_typed().as_uuid())
        .bind(order.payment_provider().as_str())
        .bind(order.payment_ref())
        .bind(version(order.version())?)
        .bind(Json(order))
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let stored: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(*order.id_typed().as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;
        match stored {
            None => Err(StoreError::NotFound("order")),
            Some(actual) => Err(StoreError::Concurrency(format!(
                "order {} is at version {actual}, expected {expected:?}",
                order.id_typed()
            ))),
        }
    }

    async fn delete_cart(&mut self, owner: UserId) -> StoreResult<()> {
        sqlx::query("DELETE FROM carts WHERE owner = $1")
            .bind(*owner.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn version(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("version {value} out of range")))
}
