use chrono::Utc;
use rand::Rng;
use tracing::{info, instrument, warn};

use storefront_catalog::AddressId;
use storefront_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion, UserId};
use storefront_events::{EventEnvelope, Event};
use storefront_orders::{
    Cancel, ChangeStatus, FulfillmentStatus, Order, OrderCommand, OrderEvent, OrderId, OrderItem,
    OrderNumber, PaymentProvider, PlaceOrder,
};

use super::cart::catalog_for;
use super::{ServiceError, ServiceResult, SharedBus, SharedStore};
use crate::store::{StoreError, StoreTransaction};

/// Attempts at a version-checked order write before giving up with a conflict.
const MAX_ATTEMPTS: u32 = 3;
const ORDER_NUMBER_ATTEMPTS: u32 = 5;

/// Checkout input: addresses by id; billing defaults to shipping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrder {
    pub shipping_address: AddressId,
    pub billing_address: Option<AddressId>,
    pub payment_method: String,
    pub payment_provider: PaymentProvider,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct OrderService {
    store: SharedStore,
    bus: SharedBus,
}

impl OrderService {
    pub fn new(store: SharedStore, bus: SharedBus) -> Self {
        Self { store, bus }
    }

    /// Turn the caller's cart into an order.
    ///
    /// Stock decrements, coupon usage, the order insert and the cart delete
    /// commit together or not at all.
    #[instrument(skip(self, request), fields(user_id = %owner))]
    pub async fn create_order(&self, owner: UserId, request: CreateOrder) -> ServiceResult<Order> {
        let now = Utc::now();

        let cart = match self.store.cart(owner).await? {
            Some(cart) if !cart.is_expired(now) => cart,
            _ => return Err(DomainError::EmptyCart.into()),
        };

        let (products, coupon) = catalog_for(&self.store, &cart).await?;
        let mut checked = cart.clone();
        let validation = checked.validate(&products, coupon.as_ref(), now);
        if !validation.valid {
            info!(issues = ?validation.issues, "checkout refused: cart needed corrections");
            self.store.save_cart(&checked).await?;
            return Err(DomainError::CartInvalid(validation.issues).into());
        }
        if cart.is_empty() {
            return Err(DomainError::EmptyCart.into());
        }

        let shipping = self.owned_address(owner, request.shipping_address).await?;
        let billing = match request.billing_address {
            Some(id) if id != request.shipping_address => self.owned_address(owner, id).await?,
            _ => shipping.clone(),
        };

        let mut tx = self.store.begin().await?;

        let mut items = Vec::with_capacity(cart.items().len());
        for line in cart.items() {
            let product = tx
                .product_for_update(line.product_id)
                .await?
                .ok_or_else(|| DomainError::not_found("product"))?;
            if !product.is_purchasable() {
                return Err(DomainError::Unavailable(product.name).into());
            }
            if product.final_price() != line.final_price {
                return Err(DomainError::CartInvalid(vec![format!("{}: Price updated", product.name)]).into());
            }

            match tx.decrement_stock(product.id, line.quantity).await {
                Ok(()) => {}
                Err(StoreError::InsufficientStock { requested, available, .. }) => {
                    return Err(DomainError::InsufficientStock {
                        product: product.name,
                        requested,
                        available,
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            }
            items.push(OrderItem::freeze(&product, line.quantity));
        }

        if let Some(applied) = cart.coupon() {
            match tx.increment_coupon_usage(applied.coupon_id).await {
                Ok(()) => {}
                Err(StoreError::CouponExhausted(_)) => {
                    return Err(DomainError::CouponUsageLimitReached.into());
                }
                Err(e) => return Err(e.into()),
            }
        }

        let number = unused_order_number(tx.as_mut()).await?;
        let order_id = OrderId::generate();
        let mut order = Order::empty(order_id);
        let events = order.execute(&OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            number,
            owner,
            items,
            shipping_address: shipping,
            billing_address: billing,
            payment_method: request.payment_method,
            payment_provider: request.payment_provider,
            coupon_code: cart.coupon().map(|c| c.code.clone()),
            coupon_discount: cart.coupon_discount(),
            notes: request.notes,
            occurred_at: now,
        }))?;

        tx.insert_order(&order).await?;
        tx.delete_cart(owner).await?;
        tx.commit().await?;

        info!(order_id = %order_id, number = %order.number(), total = %order.total(), "order placed");
        self.publish(&order, 0, &events);
        Ok(order)
    }

    async fn owned_address(
        &self,
        owner: UserId,
        id: AddressId,
    ) -> ServiceResult<storefront_catalog::AddressSnapshot> {
        match self.store.address(id).await? {
            Some(address) if address.is_owned_by(owner) => Ok(address.snapshot()),
            _ => Err(DomainError::not_found("address").into()),
        }
    }

    /// One order, visible to its owner or to staff who may read any order.
    pub async fn get(&self, viewer: UserId, order_id: OrderId, read_any: bool) -> ServiceResult<Order> {
        match self.store.order(order_id).await? {
            Some(order) if read_any || order.is_owned_by(viewer) => Ok(order),
            _ => Err(DomainError::not_found("order").into()),
        }
    }

    /// The caller's orders, newest first.
    pub async fn list(&self, owner: UserId) -> ServiceResult<Vec<Order>> {
        Ok(self.store.orders_for(owner).await?)
    }

    /// Cancel a pending or confirmed order and put its stock back.
    #[instrument(skip(self), fields(user_id = %actor, order_id = %order_id))]
    pub async fn cancel(&self, actor: UserId, order_id: OrderId, manage_any: bool) -> ServiceResult<Order> {
        self.transition(order_id, |order| {
            if !manage_any && !order.is_owned_by(actor) {
                return Err(DomainError::not_found("order").into());
            }
            Ok(OrderCommand::Cancel(Cancel {
                order_id,
                occurred_at: Utc::now(),
            }))
        })
        .await
    }

    /// Staff fulfillment update: one step forward, or a cancellation.
    #[instrument(skip(self, tracking_number), fields(order_id = %order_id, status = %status))]
    pub async fn change_status(
        &self,
        order_id: OrderId,
        status: FulfillmentStatus,
        tracking_number: Option<String>,
    ) -> ServiceResult<Order> {
        self.transition(order_id, |_| {
            Ok(OrderCommand::ChangeStatus(ChangeStatus {
                order_id,
                status,
                tracking_number: tracking_number.clone(),
                occurred_at: Utc::now(),
            }))
        })
        .await
    }

    /// Load, decide, and write back an order, restoring stock in the same
    /// transaction when the decision cancels or refunds it.
    ///
    /// The write is checked against the version the decision was made on; a
    /// concurrent writer causes a reload and a fresh decision. A decision with
    /// no events leaves the order untouched and returns it as stored.
    pub(crate) async fn transition<F>(&self, order_id: OrderId, decide: F) -> ServiceResult<Order>
    where
        F: Fn(&Order) -> ServiceResult<OrderCommand> + Send + Sync,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let current = self
                .store
                .order(order_id)
                .await?
                .ok_or_else(|| DomainError::not_found("order"))?;

            let command = decide(&current)?;
            let mut next = current.clone();
            let events = next.execute(&command)?;
            if events.is_empty() {
                return Ok(current);
            }

            let mut tx = self.store.begin().await?;
            match tx
                .update_order(&next, ExpectedVersion::Exact(current.version()))
                .await
            {
                Ok(()) => {}
                Err(StoreError::Concurrency(reason)) if attempt < MAX_ATTEMPTS => {
                    warn!(%order_id, attempt, %reason, "order changed underneath, retrying");
                    continue;
                }
                Err(StoreError::Concurrency(reason)) => {
                    return Err(DomainError::conflict(reason).into());
                }
                Err(e) => return Err(e.into()),
            }

            for (product_id, quantity) in next.stock_to_restore(&events) {
                match tx.increment_stock(product_id, quantity).await {
                    Ok(()) => {}
                    Err(StoreError::NotFound(_)) => {
                        warn!(%order_id, %product_id, quantity, "product gone, stock not restored");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            tx.commit().await?;
            self.publish(&next, current.version(), &events);
            return Ok(next);
        }

        Err(ServiceError::Domain(DomainError::conflict(format!(
            "order {order_id} kept changing"
        ))))
    }

    /// Publish committed events; a lost notification never undoes the commit.
    fn publish(&self, order: &Order, base_version: u64, events: &[OrderEvent]) {
        for (offset, event) in events.iter().enumerate() {
            let sequence = base_version + offset as u64 + 1;
            let envelope = match EventEnvelope::from_typed(order.id_typed().0, "order", sequence, event) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(event_type = event.event_type(), error = %e, "event not serializable");
                    continue;
                }
            };
            if let Err(e) = self.bus.publish(envelope) {
                warn!(event_type = event.event_type(), error = %e, "event publication failed");
            }
        }
    }
}

async fn unused_order_number(tx: &mut dyn StoreTransaction) -> ServiceResult<OrderNumber> {
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let suffix: u16 = rand::thread_rng().gen_range(0..1000);
        let number = OrderNumber::generate(Utc::now(), suffix);
        if !tx.order_number_taken(&number).await? {
            return Ok(number);
        }
    }
    Err(DomainError::conflict("could not allocate a unique order number").into())
}
